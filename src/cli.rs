// src/cli.rs

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::ScanConfig;
use crate::core::sink::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "domain-posture", version)]
#[command(about = "Bulk security-posture scanner for domain lists.")]
pub struct CommandLine {
    /// File with one domain per line, or `-` for stdin
    pub input: PathBuf,

    /// Where to write results, or `-` for stdout
    pub output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "csv")]
    pub format: OutputFormat,

    /// Number of domains scanned at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// JSON file with scan settings; flags below take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extra parking providers, one domain per line
    #[arg(long)]
    pub parking_registry: Option<PathBuf>,

    #[arg(long)]
    pub http_timeout_ms: Option<u64>,

    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Extra connection attempts for the port probe
    #[arg(long)]
    pub port_retries: Option<u32>,

    /// Skip the DNS/WHOIS parking signal
    #[arg(long)]
    pub no_whois: bool,

    /// Also log to stderr (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Applies the flags that were given on top of `config`.
    pub fn apply_overrides(&self, config: &mut ScanConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(ms) = self.http_timeout_ms {
            config.http_timeout_ms = ms;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(retries) = self.port_retries {
            config.port_retries = retries;
        }
        if self.no_whois {
            config.whois_enabled = false;
        }
    }
}
