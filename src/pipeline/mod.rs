// src/pipeline/mod.rs
//
// Upstream producer of the file-backed datasets: locate the ESMA register
// CSVs, normalize them, diff against the last run and write the outputs the
// dashboard refresh reads.

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{fs, path::PathBuf};
use tracing::{info, instrument};
use url::Url;

use crate::fetch::{get_text_with_retry, strip_bom, RetryPolicy, Transport};
use crate::table::RawRow;

pub mod discover;
pub mod normalize;
pub mod output;
pub mod state;

use normalize::{to_snake_case, ExportTable, CASP_DATE_COLUMNS};
use state::{DiffResult, StateStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Dataset {
    Casps,
    #[value(name = "non_compliant")]
    NonCompliant,
}

impl Dataset {
    pub const ALL: [Dataset; 2] = [Dataset::Casps, Dataset::NonCompliant];

    /// Output file stem, state table and `meta.json` key.
    pub fn name(self) -> &'static str {
        match self {
            Dataset::Casps => "casps",
            Dataset::NonCompliant => "non_compliant",
        }
    }

    /// Pattern a register page link must match to be this dataset's CSV.
    pub fn link_pattern(self) -> Result<Regex> {
        let re = match self {
            Dataset::Casps => r"(?i)/(CASP|CASPS)[^/]*\.csv$",
            Dataset::NonCompliant => r"(?i)/[^/]*Non[^/]*compliant[^/]*\.csv$",
        };
        Ok(Regex::new(re)?)
    }

    pub fn normalize(self, rows: &[RawRow]) -> ExportTable {
        match self {
            Dataset::Casps => normalize::normalize_casps(rows),
            Dataset::NonCompliant => normalize::normalize_non_compliant(rows),
        }
    }
}

/// Where one pipeline run reads from and writes to.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub out_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub page_url: String,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatasetSummary {
    pub url: String,
    pub rows: usize,
    pub diff: DiffResult,
}

/// Parse a register CSV into rows keyed by snake_cased headers.
pub fn parse_register_csv(text: &str) -> Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(strip_bom(text).as_bytes());
    let headers: Vec<String> = rdr
        .headers()
        .context("reading CSV header")?
        .iter()
        .map(to_snake_case)
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.context("reading CSV record")?;
        let row: RawRow = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").trim().to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Text of a `file://` URL, a bare path, or an HTTP(S) resource.
pub async fn load_source<T: Transport>(transport: &T, location: &str, retry: &RetryPolicy) -> Result<String> {
    let local = match Url::parse(location) {
        Ok(u) if u.scheme() == "file" => Some(
            u.to_file_path()
                .map_err(|_| anyhow::anyhow!("not a local file URL: {}", location))?,
        ),
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => None,
        _ => Some(PathBuf::from(location)),
    };
    match local {
        Some(path) => fs::read_to_string(&path).with_context(|| format!("reading {}", path.display())),
        None => get_text_with_retry(transport, location, retry).await,
    }
}

/// Fetch, normalize, diff and write one dataset. `url` overrides discovery
/// on the register page.
#[instrument(level = "info", skip_all, fields(dataset = dataset.name()))]
pub async fn run_dataset<T: Transport>(
    transport: &T,
    dataset: Dataset,
    url: Option<&str>,
    opts: &PipelineOptions,
) -> Result<DatasetSummary> {
    let url = match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => u.to_string(),
        None => discover::discover_csv_url(transport, &opts.page_url, &dataset.link_pattern()?, &opts.retry)
            .await?
            .to_string(),
    };
    info!(%url, "source CSV");

    let text = load_source(transport, &url, &opts.retry).await?;
    let raw = parse_register_csv(&text).with_context(|| format!("parsing {}", url))?;
    let table = dataset.normalize(&raw);

    let store = StateStore::new(&opts.state_dir)?;
    let diff = store.diff_and_update(
        dataset.name(),
        table.rows.iter().map(|r| (r.pk.as_str(), r.hash.as_str())),
    )?;

    let mut meta = Map::new();
    meta.insert("source_url".into(), Value::String(url.clone()));
    if dataset == Dataset::Casps {
        if let Some(latest) = table.latest_date(CASP_DATE_COLUMNS) {
            meta.insert("latest_record_date".into(), Value::String(latest));
        }
    }
    output::write_dataset(&opts.out_dir, &opts.backup_dir, dataset.name(), &table, &diff, meta)?;

    Ok(DatasetSummary {
        url,
        rows: table.rows.len(),
        diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::ScriptedTransport;
    use tempfile::tempdir;

    const CASP_CSV: &str = "\u{feff}ae_competentAuthority,ae_homeMemberState,ae_lei_name,ae_website,ac_serviceCode,ac_lastupdate\n\
        BaFin,DE,\"Alpha, GmbH\",alpha.de,a. custody|e. execution,2025-02-01\n\
        AMF,FR,Beta SAS,beta.fr,j. transfer,15/03/2025\n";

    fn options(root: &std::path::Path) -> PipelineOptions {
        PipelineOptions {
            out_dir: root.join("out"),
            state_dir: root.join("state"),
            backup_dir: root.join("backups"),
            page_url: discover::BASE_PAGE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn register_csv_headers_are_snake_cased() {
        let rows = parse_register_csv(CASP_CSV).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ae_lei_name"], "Alpha, GmbH");
        assert_eq!(rows[0]["ae_home_member_state"], "DE");
        assert_eq!(rows[1]["ac_service_code"], "j. transfer");
    }

    #[test]
    fn short_rows_are_padded() {
        let rows = parse_register_csv("a,b,c\n1\n").unwrap();
        assert_eq!(rows[0]["c"], "");
    }

    #[tokio::test]
    async fn casps_run_writes_outputs_and_meta() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("CASPS.csv");
        fs::write(&src, CASP_CSV).unwrap();
        let opts = options(tmp.path());
        let transport = ScriptedTransport::new();

        let summary = run_dataset(&transport, Dataset::Casps, src.to_str(), &opts)
            .await
            .unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.diff.new.len(), 2);
        assert_eq!(transport.total_calls(), 0);

        let meta: Value =
            serde_json::from_str(&fs::read_to_string(opts.out_dir.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["casps"]["latest_record_date"], "2025-03-15");
        assert_eq!(meta["casps"]["total_rows"], 2);

        let again = run_dataset(&transport, Dataset::Casps, src.to_str(), &opts)
            .await
            .unwrap();
        assert!(!again.diff.has_changes());
        let delta = fs::read_to_string(opts.out_dir.join("casps_delta.csv")).unwrap();
        assert_eq!(delta, "pk,action\n");
    }

    #[tokio::test]
    async fn url_is_discovered_when_not_given() {
        let tmp = tempdir().unwrap();
        let opts = options(tmp.path());
        let page = r#"<a href="/files/Non_compliant_entities.csv">list</a>"#;
        let csv = "Column 1,commercial_name,member_state,competent_authority,website\nnew,Scam Ltd,IT,CONSOB,scam.io\n";
        let transport = ScriptedTransport::new()
            .ok("Non_compliant_entities.csv", csv)
            .ok("markets-crypto-assets", page);

        let summary = run_dataset(&transport, Dataset::NonCompliant, None, &opts)
            .await
            .unwrap();
        assert_eq!(summary.url, "https://www.esma.europa.eu/files/Non_compliant_entities.csv");
        assert_eq!(summary.rows, 1);
        let json: Value = serde_json::from_str(
            &fs::read_to_string(opts.out_dir.join("non_compliant.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json[0]["is_new"], Value::Bool(true));
        assert_eq!(json[0]["home_member_state"], "Italy");
    }
}
