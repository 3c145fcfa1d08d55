// src/config.rs

use clap::Parser;
use std::path::{Path, PathBuf};

pub const DEFAULT_SHEET_ID: &str = "1RfeiT68rH65izevXw_Upqdn0lXz-IGI83Zn3q0SBEbE";

pub const DEFAULT_CSV_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vRWudeV0zFLqB54658hCDUgSRFfy-ADeR2JMilO-oel74hjBr1CdIB2FWufxyR2yuQJGNaBPHNYG7vh/pub?gid=0&single=true&output=csv";
pub const DEFAULT_DATE_URL: &str = "https://docs.google.com/spreadsheets/d/1RfeiT68rH65izevXw_Upqdn0lXz-IGI83Zn3q0SBEbE/export?format=csv&gid=353293525";
pub const DEFAULT_CASPS_URL: &str = "https://docs.google.com/spreadsheets/d/1RfeiT68rH65izevXw_Upqdn0lXz-IGI83Zn3q0SBEbE/gviz/tq?tqx=out:csv&sheet=CASPs";
pub const DEFAULT_NON_COMPLIANT_URL: &str = "https://docs.google.com/spreadsheets/d/1RfeiT68rH65izevXw_Upqdn0lXz-IGI83Zn3q0SBEbE/gviz/tq?tqx=out:csv&sheet=NonCompliant";

/// Run configuration for the dashboard refresh.
///
/// Every field can be given as a flag or through its environment variable;
/// flags win over the environment, which wins over the built-in default.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Refresh the MiCAR dashboard page from the EMT/CASP registers"
)]
pub struct Config {
    /// Public CSV export of the EMT issuer register.
    #[arg(long, env = "CSV_URL", default_value = DEFAULT_CSV_URL)]
    pub csv_url: String,

    /// Small key/value CSV holding the register snapshot dates.
    #[arg(long, env = "DATE_URL", default_value = DEFAULT_DATE_URL)]
    pub date_url: String,

    #[arg(long, env = "CASPS_URL", default_value = DEFAULT_CASPS_URL)]
    pub casps_url: String,

    /// Pipeline-produced `casps.csv`. When set, CASPs are read from disk.
    #[arg(long, env = "CASPS_PATH")]
    pub casps_path: Option<PathBuf>,

    #[arg(long, env = "NON_COMPLIANT_URL", default_value = DEFAULT_NON_COMPLIANT_URL)]
    pub non_compliant_url: String,

    /// Pipeline-produced `non_compliant.csv`. When set, read from disk.
    #[arg(long, env = "NON_COMPLIANT_PATH")]
    pub non_compliant_path: Option<PathBuf>,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_SHEET_ID", default_value = DEFAULT_SHEET_ID)]
    pub google_sheet_id: String,

    #[arg(long, env = "EMT_RANGE", default_value = "EMTs!A:J")]
    pub emt_range: String,

    #[arg(long, env = "DATES_RANGE", default_value = "Dates!A:B")]
    pub dates_range: String,

    #[arg(long, env = "CASPS_RANGE", default_value = "CASPs!A:Z")]
    pub casps_range: String,

    #[arg(long, env = "NON_COMPLIANT_RANGE", default_value = "NonCompliant!A:Z")]
    pub non_compliant_range: String,

    /// Page whose embedded data arrays get rewritten.
    #[arg(long, default_value = "index.html")]
    pub html: PathBuf,

    /// Where the normalized caches and run state live.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Timestamped pipeline backups, searched when a pipeline file is missing.
    #[arg(long, default_value = "data/backups")]
    pub backups_dir: PathBuf,

    /// Ignore the snapshot cache and always fetch.
    #[arg(long)]
    pub force: bool,
}

/// Credentials for the Sheets values API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetsApi {
    pub key: String,
    pub sheet_id: String,
}

impl Config {
    /// A config with every default applied and nothing read from the
    /// environment or the command line.
    pub fn with_defaults() -> Self {
        Self {
            csv_url: DEFAULT_CSV_URL.to_string(),
            date_url: DEFAULT_DATE_URL.to_string(),
            casps_url: DEFAULT_CASPS_URL.to_string(),
            casps_path: None,
            non_compliant_url: DEFAULT_NON_COMPLIANT_URL.to_string(),
            non_compliant_path: None,
            google_api_key: None,
            google_sheet_id: DEFAULT_SHEET_ID.to_string(),
            emt_range: "EMTs!A:J".to_string(),
            dates_range: "Dates!A:B".to_string(),
            casps_range: "CASPs!A:Z".to_string(),
            non_compliant_range: "NonCompliant!A:Z".to_string(),
            html: PathBuf::from("index.html"),
            data_dir: PathBuf::from("data"),
            backups_dir: PathBuf::from("data/backups"),
            force: false,
        }
    }

    /// The values API is only tried when both key and sheet id are non-blank.
    pub fn sheets_api(&self) -> Option<SheetsApi> {
        let key = self.google_api_key.as_deref().map(str::trim).unwrap_or("");
        let sheet_id = self.google_sheet_id.trim();
        if key.is_empty() || sheet_id.is_empty() {
            return None;
        }
        Some(SheetsApi {
            key: key.to_string(),
            sheet_id: sheet_id.to_string(),
        })
    }

    /// Directory holding the pipeline's `meta.json` and delta logs.
    pub fn pipeline_dir(&self) -> Option<&Path> {
        self.casps_path
            .as_deref()
            .map(|p| p.parent().unwrap_or_else(|| Path::new(".")))
    }
}
