use anyhow::{Context, Result};
use clap::Parser;
use micar_dashboard::{
    fetch::{ReqwestTransport, RetryPolicy},
    pipeline::{self, discover::BASE_PAGE_URL, Dataset, PipelineOptions},
};
use reqwest::Client;
use serde_json::{Map, Value};
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Download the ESMA interim MiCA registers and write the dashboard's pipeline files"
)]
struct Args {
    /// Directory for `<dataset>.csv|.json|_delta.csv` and `meta.json`.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,
    #[arg(long, default_value = "data/state")]
    state_dir: PathBuf,
    #[arg(long, default_value = "data/backups")]
    backup_dir: PathBuf,
    /// Register page scanned for CSV links when no URL is given.
    #[arg(long, default_value = BASE_PAGE_URL)]
    page_url: String,
    /// Process a single dataset.
    #[arg(long, value_enum)]
    only: Option<Dataset>,
    #[arg(long, env = "CASP_CSV_URL")]
    casp_csv_url: Option<String>,
    #[arg(long, env = "NON_COMPLIANT_CSV_URL")]
    non_compliant_csv_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let client = Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("esma-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let transport = ReqwestTransport::new(client);

    let opts = PipelineOptions {
        out_dir: args.out_dir.clone(),
        state_dir: args.state_dir.clone(),
        backup_dir: args.backup_dir.clone(),
        page_url: args.page_url.clone(),
        retry: RetryPolicy::default(),
    };

    let datasets: Vec<Dataset> = match args.only {
        Some(one) => vec![one],
        None => Dataset::ALL.to_vec(),
    };

    let mut summary = Map::new();
    for dataset in datasets {
        let url = match dataset {
            Dataset::Casps => args.casp_csv_url.as_deref(),
            Dataset::NonCompliant => args.non_compliant_csv_url.as_deref(),
        };
        let result = pipeline::run_dataset(&transport, dataset, url, &opts)
            .await
            .with_context(|| format!("{} pipeline failed", dataset.name()))?;
        info!(
            dataset = dataset.name(),
            rows = result.rows,
            new = result.diff.new.len(),
            updated = result.diff.updated.len(),
            removed = result.diff.removed.len(),
            "dataset done"
        );
        summary.insert(dataset.name().to_string(), serde_json::to_value(&result)?);
    }

    println!("{}", serde_json::to_string_pretty(&Value::Object(summary))?);
    Ok(())
}
