use anyhow::Result;
use clap::Parser;
use semdex::cli::{self, Cli};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry OPENAI_API_KEY
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "semdex=debug,tower_http=debug"
    } else if cli.quiet {
        "semdex=warn"
    } else {
        "semdex=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting semdex v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
