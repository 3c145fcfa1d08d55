// src/fetch/resolve.rs
//
// Per-dataset source selection:
//   network-backed: Api -> Csv -> fail
//   file-backed:    File -> Backup -> fail

use anyhow::{bail, Result};
use glob::{glob, Pattern};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use super::{get_text_with_retry, sheets, strip_bom, RetryPolicy, Transport};
use crate::config::{Config, SheetsApi};
use crate::normalize::SchemaVariant;
use crate::table::{build_table, RawRow};

const PREVIEW_CHARS: usize = 200;

/// Where a dataset's rows came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Api,
    Csv,
    File,
    Backup,
}

impl Origin {
    /// Pipeline files carry pipeline headers; everything else is the
    /// spreadsheet layout.
    pub fn variant(self) -> SchemaVariant {
        match self {
            Origin::Api | Origin::Csv => SchemaVariant::Spreadsheet,
            Origin::File | Origin::Backup => SchemaVariant::Pipeline,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Api => "values API",
            Origin::Csv => "CSV export",
            Origin::File => "pipeline file",
            Origin::Backup => "pipeline backup",
        };
        f.write_str(s)
    }
}

/// Everything needed to locate one dataset.
#[derive(Clone, Debug)]
pub struct DatasetSource {
    pub name: &'static str,
    pub api_range: String,
    pub csv_url: String,
    pub file: Option<PathBuf>,
    pub require_numeric_id: bool,
}

impl DatasetSource {
    pub fn emts(config: &Config) -> Self {
        Self {
            name: "emts",
            api_range: config.emt_range.clone(),
            csv_url: config.csv_url.clone(),
            file: None,
            require_numeric_id: true,
        }
    }

    pub fn casps(config: &Config) -> Self {
        Self {
            name: "casps",
            api_range: config.casps_range.clone(),
            csv_url: config.casps_url.clone(),
            file: config.casps_path.clone(),
            require_numeric_id: false,
        }
    }

    pub fn non_compliant(config: &Config) -> Self {
        Self {
            name: "non-compliant",
            api_range: config.non_compliant_range.clone(),
            csv_url: config.non_compliant_url.clone(),
            file: config.non_compliant_path.clone(),
            require_numeric_id: false,
        }
    }
}

#[derive(Debug)]
pub struct Resolved {
    pub origin: Origin,
    /// URL or path the rows were read from.
    pub location: String,
    pub rows: Vec<RawRow>,
}

impl Resolved {
    pub fn variant(&self) -> SchemaVariant {
        self.origin.variant()
    }
}

pub struct SourceResolver<'a, T> {
    transport: &'a T,
    api: Option<SheetsApi>,
    backups_dir: PathBuf,
    retry: RetryPolicy,
}

impl<'a, T: Transport> SourceResolver<'a, T> {
    pub fn new(transport: &'a T, config: &Config) -> Self {
        Self {
            transport,
            api: config.sheets_api(),
            backups_dir: config.backups_dir.clone(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_api(&self) -> bool {
        self.api.is_some()
    }

    fn plan(&self, source: &DatasetSource) -> Vec<Origin> {
        if source.file.is_some() {
            vec![Origin::File, Origin::Backup]
        } else if self.api.is_some() {
            vec![Origin::Api, Origin::Csv]
        } else {
            vec![Origin::Csv]
        }
    }

    /// Walk the dataset's fallback chain and return the first usable rows.
    #[instrument(level = "info", skip(self, source), fields(dataset = source.name))]
    pub async fn resolve(&self, source: &DatasetSource) -> Result<Resolved> {
        for origin in self.plan(source) {
            let found = match origin {
                Origin::Api => self.try_api(source).await,
                Origin::Csv => Some(self.try_csv(source).await?),
                Origin::File => self.try_file(source),
                Origin::Backup => self.try_backup(source)?,
            };
            if let Some((location, rows)) = found {
                info!(%origin, %location, rows = rows.len(), "resolved {}", source.name);
                return Ok(Resolved {
                    origin,
                    location,
                    rows,
                });
            }
        }
        bail!("{}: every source was exhausted", source.name)
    }

    /// Raw grid for a range, `None` when the API is not configured.
    pub async fn api_values(&self, range: &str) -> Option<Result<Vec<Vec<String>>>> {
        let api = self.api.as_ref()?;
        Some(sheets::fetch_values(self.transport, api, range, &self.retry).await)
    }

    /// Fetch a CSV export and reject bodies that are not plausibly CSV.
    pub async fn fetch_csv_text(&self, url: &str) -> Result<String> {
        let body = get_text_with_retry(self.transport, url, &self.retry).await?;
        validate_csv_body(&body, url)?;
        Ok(strip_bom(&body).to_string())
    }

    async fn try_api(&self, source: &DatasetSource) -> Option<(String, Vec<RawRow>)> {
        match self.api_values(&source.api_range).await? {
            Ok(grid) => {
                let rows = sheets::rows_from_values(grid, source.require_numeric_id);
                if rows.is_empty() {
                    warn!(range = %source.api_range, "values API returned no rows; falling back to CSV");
                    None
                } else {
                    Some((format!("range {}", source.api_range), rows))
                }
            }
            Err(e) => {
                warn!(range = %source.api_range, error = %format!("{:#}", e), "values API failed; falling back to CSV");
                None
            }
        }
    }

    async fn try_csv(&self, source: &DatasetSource) -> Result<(String, Vec<RawRow>)> {
        let text = self.fetch_csv_text(&source.csv_url).await?;
        let rows = build_table(&text, source.require_numeric_id);
        Ok((source.csv_url.clone(), rows))
    }

    fn try_file(&self, source: &DatasetSource) -> Option<(String, Vec<RawRow>)> {
        let path = source.file.as_ref()?;
        match read_non_empty(path) {
            Some(text) => Some((path.display().to_string(), build_table(&text, source.require_numeric_id))),
            None => {
                warn!(path = %path.display(), "pipeline file missing or empty; searching backups");
                None
            }
        }
    }

    fn try_backup(&self, source: &DatasetSource) -> Result<Option<(String, Vec<RawRow>)>> {
        let Some(path) = source.file.as_ref() else {
            return Ok(None);
        };
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            bail!("{}: {} has no file name", source.name, path.display());
        };
        match find_backup(&self.backups_dir, file_name)? {
            Some((backup, text)) => {
                warn!(backup = %backup.display(), "using backup copy");
                Ok(Some((
                    backup.display().to_string(),
                    build_table(&text, source.require_numeric_id),
                )))
            }
            None => bail!(
                "{}: {} is missing or empty and no non-empty backup exists under {}",
                source.name,
                path.display(),
                self.backups_dir.display()
            ),
        }
    }
}

/// Reject empty bodies and HTML error/redirect pages served in place of CSV.
/// Only the start of the body is inspected; markup inside a cell is data.
pub fn validate_csv_body(body: &str, url: &str) -> Result<()> {
    let trimmed = strip_bom(body).trim();
    if trimmed.is_empty() {
        bail!("{} returned an empty body", url);
    }
    let head = trimmed
        .chars()
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase();
    if ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|marker| head.starts_with(marker))
    {
        let preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
        bail!("{} returned HTML instead of CSV: {}", url, preview);
    }
    Ok(())
}

fn read_non_empty(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => Some(strip_bom(&text).to_string()),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read");
            None
        }
    }
}

/// Newest non-empty `<backups_dir>/**/<file_name>`, ordered by the name of
/// the directory holding it (timestamped, so lexicographic = chronological).
pub fn find_backup(backups_dir: &Path, file_name: &str) -> Result<Option<(PathBuf, String)>> {
    let pattern = format!(
        "{}/**/{}",
        Pattern::escape(&backups_dir.to_string_lossy()),
        Pattern::escape(file_name)
    );
    let mut candidates: Vec<PathBuf> = glob(&pattern)?.filter_map(|p| p.ok()).collect();

    let dir_name = |p: &PathBuf| {
        p.parent()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    candidates.sort_by(|a, b| dir_name(b).cmp(&dir_name(a)).then_with(|| b.cmp(a)));

    for candidate in candidates {
        if let Some(text) = read_non_empty(&candidate) {
            return Ok(Some((candidate, text)));
        }
        debug!(path = %candidate.display(), "skipping empty backup");
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::{Scripted, ScriptedTransport};
    use tempfile::tempdir;

    const EMT_CSV: &str = "#,Issuer (HQ)\n1,A\n2,B\n";

    fn config_with_api() -> Config {
        let mut cfg = Config::with_defaults();
        cfg.google_api_key = Some("key".into());
        cfg.google_sheet_id = "sheet".into();
        cfg.csv_url = "https://csv.test/emt".into();
        cfg
    }

    #[tokio::test]
    async fn api_rows_win_when_present() {
        let cfg = config_with_api();
        let transport = ScriptedTransport::new().ok(
            "sheets.googleapis.com",
            r##"{"values":[["#","Issuer (HQ)"],["1","A"]]}"##,
        );
        let resolver = SourceResolver::new(&transport, &cfg);
        let got = resolver.resolve(&DatasetSource::emts(&cfg)).await.unwrap();
        assert_eq!(got.origin, Origin::Api);
        assert_eq!(got.rows.len(), 1);
        assert_eq!(transport.calls("csv.test"), 0);
    }

    #[tokio::test]
    async fn empty_api_result_falls_back_to_csv() {
        let cfg = config_with_api();
        let transport = ScriptedTransport::new()
            .ok("sheets.googleapis.com", r##"{"values":[["#","Issuer (HQ)"]]}"##)
            .ok("csv.test", EMT_CSV);
        let resolver = SourceResolver::new(&transport, &cfg);
        let got = resolver.resolve(&DatasetSource::emts(&cfg)).await.unwrap();
        assert_eq!(got.origin, Origin::Csv);
        assert_eq!(got.variant(), SchemaVariant::Spreadsheet);
        assert_eq!(got.rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn api_failure_falls_back_to_csv() {
        let cfg = config_with_api();
        let transport = ScriptedTransport::new()
            .route("sheets.googleapis.com", vec![Scripted::Status(403, "denied".into())])
            .ok("csv.test", EMT_CSV);
        let resolver = SourceResolver::new(&transport, &cfg);
        let got = resolver.resolve(&DatasetSource::emts(&cfg)).await.unwrap();
        assert_eq!(got.origin, Origin::Csv);
    }

    #[tokio::test]
    async fn html_body_is_fatal() {
        let mut cfg = Config::with_defaults();
        cfg.csv_url = "https://csv.test/emt".into();
        let transport = ScriptedTransport::new().ok(
            "csv.test",
            "<!DOCTYPE html><html><body>Sign in</body></html>",
        );
        let resolver = SourceResolver::new(&transport, &cfg);
        let err = resolver
            .resolve(&DatasetSource::emts(&cfg))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTML instead of CSV"));
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(validate_csv_body("  \n", "u").is_err());
        assert!(validate_csv_body("\u{feff}a,b\n1,2", "u").is_ok());
    }

    #[test]
    fn markup_inside_cells_is_not_html() {
        assert!(validate_csv_body("name,notes\nX,\"see <html> and <body> tags\"\n", "u").is_ok());
        assert!(validate_csv_body("\n  <HTML><body>denied</body></HTML>", "u").is_err());
        assert!(validate_csv_body("<head><title>302</title></head>", "u").is_err());
    }

    #[test]
    fn backup_search_treats_glob_characters_literally() {
        let tmp = tempdir().unwrap();
        let backups = tmp.path().join("backups [prod]*");
        let dir = backups.join("casps").join("20240101000000Z");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("casps.csv"), "lei_name\nKept\n").unwrap();

        let (path, text) = find_backup(&backups, "casps.csv").unwrap().unwrap();
        assert!(path.starts_with(&backups));
        assert!(text.contains("Kept"));
    }

    #[tokio::test]
    async fn missing_file_uses_newest_non_empty_backup() {
        let tmp = tempdir().unwrap();
        let backups = tmp.path().join("backups");
        for (stamp, body) in [
            ("20240101000000Z", "lei_name\nOld\n"),
            ("20240301000000Z", "lei_name\nNewest\n"),
            ("20240401000000Z", "   \n"),
        ] {
            let dir = backups.join("casps").join(stamp);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("casps.csv"), body).unwrap();
        }

        let mut cfg = Config::with_defaults();
        cfg.casps_path = Some(tmp.path().join("out").join("casps.csv"));
        cfg.backups_dir = backups;
        let transport = ScriptedTransport::new();
        let resolver = SourceResolver::new(&transport, &cfg);

        let got = resolver.resolve(&DatasetSource::casps(&cfg)).await.unwrap();
        assert_eq!(got.origin, Origin::Backup);
        assert_eq!(got.variant(), SchemaVariant::Pipeline);
        assert_eq!(got.rows[0]["lei_name"], "Newest");
        assert!(got.location.contains("20240301000000Z"));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn present_file_is_used_and_no_backup_is_fatal() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("non_compliant.csv");
        fs::write(&file, "lei_name,is_new\nX,true\n").unwrap();

        let mut cfg = Config::with_defaults();
        cfg.non_compliant_path = Some(file.clone());
        cfg.backups_dir = tmp.path().join("backups");
        let transport = ScriptedTransport::new();
        let resolver = SourceResolver::new(&transport, &cfg);

        let got = resolver
            .resolve(&DatasetSource::non_compliant(&cfg))
            .await
            .unwrap();
        assert_eq!(got.origin, Origin::File);
        assert_eq!(got.rows.len(), 1);

        fs::write(&file, "").unwrap();
        let err = resolver
            .resolve(&DatasetSource::non_compliant(&cfg))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no non-empty backup"));
    }
}
