use clap::Parser;
use tracing_subscriber::EnvFilter;

use qala_chat::cli::Args;
use qala_chat::{AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let refresh_every = config.knowledge.refresh_interval();
    let state = AppState::from_config(config)?;
    let refresher = state.knowledge.clone().spawn_refresh_task(refresh_every);

    tokio::select! {
        result = qala_chat::web::serve(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    refresher.abort();
    Ok(())
}
