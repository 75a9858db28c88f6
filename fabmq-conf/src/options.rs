use structopt::StructOpt;

use fabmq_utils::NodeId;

#[derive(StructOpt, Debug, Clone, Default)]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Node id, a UUID; generated at startup when absent
    #[structopt(name = "id", long)]
    pub node_id: Option<NodeId>,
}
