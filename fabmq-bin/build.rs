use std::fs::File;
use std::io::prelude::*;

fn main() {
    version();
}

fn version() {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap();
    let build_time = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let server_version = format!("fabmq/{}-{}", &version, &build_time);

    let out = std::env::var("OUT_DIR").unwrap();
    let mut version_file = File::create(format!("{}/{}", out, "version.rs")).unwrap();
    version_file.write_all(b"\n/// fabmq version").unwrap();
    version_file
        .write_all(format!("\npub const VERSION: &str = \"{}\";", server_version).as_bytes())
        .unwrap();
}
