use clap::Parser;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Backend service orchestrating sandboxed AI agent executions
#[derive(Debug, Parser)]
#[command(name = "agentum", version, about)]
pub struct Cli {
    /// Configuration directory (api.yaml, permissions.yaml, security.yaml)
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<String>,

    /// Data directory holding sessions and the database
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<String>,

    /// Listen port; overrides api.external_port from api.yaml
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level filter (RUST_LOG still takes precedence)
    #[arg(long, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}
