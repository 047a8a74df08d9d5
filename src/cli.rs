use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "qala-chat")]
#[command(version)]
#[command(about = "Sorani Kurdish chat backend with a knowledge-base fast path and streamed LLM answers")]
pub struct Args {
    /// TOML configuration file; environment variables override it
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to bind (overrides config and HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config and PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug, qala_chat=trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Apply command-line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}
