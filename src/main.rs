mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use embedshot_lib::{server, Config, ScreenshotService};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: cli::Cli) -> embedshot_lib::Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let addr = config.bind_addr()?;
    let service = Arc::new(ScreenshotService::new(
        config.engine_options(),
        config.session_options(),
        config.capture.concurrency,
    ));

    tracing::info!(
        concurrency = config.capture.concurrency,
        settle_delay = ?config.capture.settle_delay,
        handshake_timeout = ?config.capture.handshake_timeout,
        "starting embedshot"
    );

    server::serve(addr, service).await
}
