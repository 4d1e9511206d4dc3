use clap::Parser;
use std::path::PathBuf;

use cadbridge_core::config::BridgeConfig;
use cadbridge_core::error::BridgeError;

/// HTTP bridge in front of a simulated single-threaded CAD host.
#[derive(Debug, Parser)]
#[command(name = "cadbridge", version, about)]
pub struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// Minimum spacing between two queue drains, in milliseconds.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Fallback log filter when RUST_LOG is unset (e.g. "debug", "cadbridge_core=trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<BridgeConfig, BridgeError> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.pump.interval_ms = interval_ms;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
