use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use embedshot_lib::Config;

#[derive(Parser)]
#[command(name = "embedshot")]
#[command(
    version,
    about = "Renders embedded Power BI dashboards in headless Chromium and serves PNG captures over HTTP"
)]
pub struct Cli {
    #[arg(
        long,
        value_name = "PATH",
        help = "Optional config file (TOML); CLI flags override config values"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Address to listen on (e.g. 127.0.0.1:3001)")]
    pub bind: Option<SocketAddr>,

    #[arg(long, help = "Maximum captures running concurrently")]
    pub concurrency: Option<usize>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Bound on the dashboard load handshake"
    )]
    pub handshake_timeout: Option<u64>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Delay between the loaded event and the capture"
    )]
    pub settle_delay: Option<u64>,

    #[arg(long, help = "Node.js command used to run the engine helper")]
    pub node_command: Option<String>,

    #[arg(long, help = "Run Chromium with a visible window (debugging)")]
    pub no_headless: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

impl Cli {
    /// Applies flag overrides on top of the loaded config.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.server.bind = bind.to_string();
        }
        if let Some(concurrency) = self.concurrency {
            config.capture.concurrency = concurrency;
        }
        if let Some(secs) = self.handshake_timeout {
            config.capture.handshake_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.settle_delay {
            config.capture.settle_delay = std::time::Duration::from_secs(secs);
        }
        if let Some(node_command) = &self.node_command {
            config.engine.node_command = node_command.clone();
        }
        if self.no_headless {
            config.engine.headless = false;
        }
    }
}
