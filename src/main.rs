use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use wardrobe_ledger::config::{Cli, Command, Config};
use wardrobe_ledger::metadata::HttpMetadataSource;
use wardrobe_ledger::records::{encode_csv, read_csv};
use wardrobe_ledger::schema::normalize_table;
use wardrobe_ledger::{build_router, AppState, Gateway, Store};

const CSV_EXTENSION: &str = ".csv";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(Command::Normalize { file }) = &cli.command {
        return normalize_file(file);
    }

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load(&cli).context("Failed to load configuration")?;
    let addr = config.addr()?;
    info!("Data directory: {}", config.root.join(&config.data_dir).display());

    let gateway = Gateway::new(&config.root, &config.data_dir)?;
    let metadata = Arc::new(HttpMetadataSource::new()?);
    let state = AppState::new(Store::new(gateway), metadata);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

/// Reads one CSV, canonicalizes its headers and writes it to stdout.
fn normalize_file(file: &Path) -> Result<()> {
    if !file.to_string_lossy().ends_with(CSV_EXTENSION) {
        anyhow::bail!("The file must have a {} extension", CSV_EXTENSION);
    }

    let raw = read_csv(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let normalized = normalize_table(&raw);
    info!(
        "Normalized {} ({} records, {} columns)",
        file.display(),
        normalized.records.len(),
        normalized.columns.len()
    );

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(encode_csv(&normalized.columns, &normalized.records)?.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
