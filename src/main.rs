use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use page_cloner::config::Config;
use page_cloner::constants::OUTPUT_MIME_TYPE;
use page_cloner::output::save_snapshot;
use page_cloner::clone_page_with;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let url = std::env::args().nth(1).unwrap_or_default();
    let url = url.trim();
    if url.is_empty() {
        anyhow::bail!("Please enter a valid URL (usage: page-cloner <url>)");
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        url = %url,
        relays = config.relays.len(),
        direct_fetch = ?config.direct_fetch,
        "Configuration loaded"
    );

    let html = clone_page_with(&config, url).await?;

    save_snapshot(&html, &config.output_path).await?;

    info!(
        path = %config.output_path.display(),
        bytes = html.len(),
        mime = OUTPUT_MIME_TYPE,
        "Webpage cloned successfully"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,page_cloner=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
