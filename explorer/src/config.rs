use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::error::{ExplorerError, Result};

/// Hard ceiling on address history page sizes, independent of
/// configuration.
pub const MAX_ADDR_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: String,
    pub node: NodeConfig,
    pub db: DbConfig,
    pub server: ServerConfig,
    pub indexer: IndexerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Websocket JSON-RPC endpoint of the vantad node.
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub rpc_cert: Option<PathBuf>,
    pub disable_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// PostgreSQL connection string. Ignored in lite mode.
    pub pg_url: String,
    /// Lite mode skips the relational store entirely; chart operations are
    /// unavailable.
    pub lite: bool,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Address history page size cap (hard max 1000).
    pub addr_history_limit: i64,
    /// Recompute charts every N blocks.
    pub charts_update_interval: u32,
    /// Emit a progress event every N blocks during sync.
    pub progress_log_interval: u32,
}

impl Config {
    /// Load configuration from file if it exists, otherwise use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| ExplorerError::Config(format!("failed to parse config: {e}")))
        } else {
            Ok(Config::default())
        }
    }

    /// Override config with CLI arguments.
    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(network) = &args.network {
            self.network = network.clone();
        }
        if let Some(url) = &args.node_url {
            self.node.rpc_url = url.clone();
        }
        if let Some(user) = &args.node_user {
            self.node.rpc_user = user.clone();
        }
        if let Some(pass) = &args.node_pass {
            self.node.rpc_pass = pass.clone();
        }
        if let Some(cert) = &args.node_cert {
            self.node.rpc_cert = Some(cert.clone());
        }
        if args.no_tls {
            self.node.disable_tls = true;
        }
        if let Some(pg_url) = &args.pg_url {
            self.db.pg_url = pg_url.clone();
        }
        if args.lite {
            self.db.lite = true;
        }
        if let Some(data_dir) = &args.data_dir {
            self.db.data_dir = data_dir.clone();
        }
        if let Some(listen) = &args.listen {
            self.server.listen = listen.clone();
        }
    }

    /// Clamp and validate after file load and CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        if self.indexer.addr_history_limit > MAX_ADDR_HISTORY_LIMIT {
            self.indexer.addr_history_limit = MAX_ADDR_HISTORY_LIMIT;
        }
        if self.indexer.addr_history_limit < 1 {
            return Err(ExplorerError::Config(
                "addr_history_limit must be at least 1".into(),
            ));
        }
        if self.node.rpc_url.is_empty() {
            return Err(ExplorerError::Config("node rpc_url must be set".into()));
        }
        if !self.db.lite && self.db.pg_url.is_empty() {
            return Err(ExplorerError::Config(
                "pg_url must be set unless running in lite mode".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            node: NodeConfig {
                rpc_url: "wss://localhost:14010/ws".to_string(),
                rpc_user: String::new(),
                rpc_pass: String::new(),
                rpc_cert: None,
                disable_tls: false,
            },
            db: DbConfig {
                pg_url: "postgresql://vanta@localhost/vanta_explorer".to_string(),
                lite: false,
                data_dir: PathBuf::from("./data"),
            },
            server: ServerConfig {
                listen: "127.0.0.1:7777".to_string(),
            },
            indexer: IndexerConfig {
                addr_history_limit: 1000,
                charts_update_interval: 5,
                progress_log_interval: 1000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_validate() {
        let mut cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.indexer.addr_history_limit, 1000);
        assert_eq!(cfg.indexer.charts_update_interval, 5);
        assert_eq!(cfg.indexer.progress_log_interval, 1000);
    }

    #[test]
    fn history_limit_clamped_to_hard_max() {
        let mut cfg = Config::default();
        cfg.indexer.addr_history_limit = 5000;
        cfg.validate().unwrap();
        assert_eq!(cfg.indexer.addr_history_limit, MAX_ADDR_HISTORY_LIMIT);
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut cfg = Config::default();
        let args = Args::parse_from([
            "vanta-explorer",
            "--network",
            "simnet",
            "--pg-url",
            "postgresql://u@db/x",
            "--lite",
        ]);
        cfg.apply_cli_overrides(&args);
        assert_eq!(cfg.network, "simnet");
        assert_eq!(cfg.db.pg_url, "postgresql://u@db/x");
        assert!(cfg.db.lite);
    }

    #[test]
    fn lite_mode_skips_pg_requirement() {
        let mut cfg = Config::default();
        cfg.db.pg_url = String::new();
        cfg.db.lite = true;
        cfg.validate().unwrap();
    }
}
