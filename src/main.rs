use anyhow::{Context, Result};
use clap::Parser;
use micar_dashboard::{config::Config, fetch::ReqwestTransport, refresh};
use reqwest::Client;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) configuration ────────────────────────────────────────────
    let config = Config::parse();
    info!(
        html = %config.html.display(),
        data_dir = %config.data_dir.display(),
        values_api = config.sheets_api().is_some(),
        casps_from_pipeline = config.casps_path.is_some(),
        non_compliant_from_pipeline = config.non_compliant_path.is_some(),
        "startup"
    );

    // ─── 3) refresh ──────────────────────────────────────────────────
    let client = Client::builder()
        .gzip(true)
        .build()
        .context("building HTTP client")?;
    let transport = ReqwestTransport::new(client);

    let start = Instant::now();
    let outcome = refresh::run(&config, &transport).await?;

    // ─── 4) summary ──────────────────────────────────────────────────
    if !outcome.report.missing.is_empty() {
        warn!(missing = ?outcome.report.missing, "page written with anchors missing");
    }
    info!(
        emts = outcome.data.emts.len(),
        casps = outcome.data.casps.len(),
        non_compliant = outcome.data.non_compliant.len(),
        reused_cache = outcome.reused_cache,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "dashboard refreshed"
    );
    Ok(())
}
