#![deny(unsafe_code)]

use std::process;
use std::sync::Arc;

use structopt::StructOpt;

use fabmq::auth::StaticAuthorizer;
use fabmq::broker::BrokerBuilder;
use fabmq::conf::{Options, Settings};
use fabmq::logger::logger_init;
use fabmq::server::{listener_builder, MqttServer};
use fabmq::Result;

mod version {
    include!(concat!(env!("OUT_DIR"), "/version.rs"));
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fabmqd failed to start, {e:?}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    //init config
    let settings = Settings::init(Options::from_args())?;

    //init log
    logger_init(&settings.log)?;
    log::info!("{}", version::VERSION);
    settings.logs();

    let broker = BrokerBuilder::new(settings.node.id)
        .settings(settings.mqtt.clone())
        .authorizer(Arc::new(StaticAuthorizer::from(&settings.auth)))
        .build()
        .await?;

    let mut server = MqttServer::new(broker);
    for listen_cfg in settings.listeners.tcps.values() {
        server = server.listener(listener_builder(listen_cfg).bind()?);
    }
    #[cfg(feature = "ws")]
    for listen_cfg in settings.listeners.wss.values() {
        server = server.listener(listener_builder(listen_cfg).bind()?.ws());
    }
    #[cfg(not(feature = "ws"))]
    if !settings.listeners.wss.is_empty() {
        log::warn!("websocket listeners are configured but the ws feature is disabled");
    }

    tokio::select! {
        r = server.build().run() => r?,
        r = tokio::signal::ctrl_c() => {
            r?;
            log::info!("ctrl-c received, shutting down");
        }
    }
    Ok(())
}
