use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vanta-explorer")]
#[command(about = "Vanta block explorer indexing and query backend", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// Data directory (stake database lives here)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Network (mainnet, testnet, simnet)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// vantad RPC websocket URL
    #[arg(long)]
    pub node_url: Option<String>,

    /// vantad RPC username
    #[arg(long)]
    pub node_user: Option<String>,

    /// vantad RPC password
    #[arg(long)]
    pub node_pass: Option<String>,

    /// Path to the node's TLS certificate
    #[arg(long)]
    pub node_cert: Option<PathBuf>,

    /// Disable TLS for the node connection
    #[arg(long)]
    pub no_tls: bool,

    /// PostgreSQL connection string
    #[arg(long)]
    pub pg_url: Option<String>,

    /// Run without the relational store (summary data only)
    #[arg(long)]
    pub lite: bool,

    /// Listen address for the API server consumer
    #[arg(long)]
    pub listen: Option<String>,
}

pub fn parse_args() -> Args {
    Args::parse()
}
