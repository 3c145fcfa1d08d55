// src/snapshot/meta.rs
//
// Reads the pipeline's meta.json / casps_delta.csv to decide whether the
// "CASPs last updated" display date should move.

use chrono::NaiveDate;
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::table::build_table;

pub use crate::pipeline::output::META_FILE;
pub const CASPS_DELTA_FILE: &str = "casps_delta.csv";

/// `latest_record_date`, else the date part of `generated_at`, for the
/// `casps` entry (or a legacy flat meta object).
pub fn casps_meta_date(pipeline_dir: &Path) -> Option<String> {
    let path = pipeline_dir.join(META_FILE);
    let text = fs::read_to_string(&path).ok()?;
    let root: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "meta.json malformed");
            return None;
        }
    };
    let entry = root.get("casps").filter(|v| v.is_object()).unwrap_or(&root);
    let field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    field("latest_record_date")
        .or_else(|| field("generated_at"))
        .map(|s| s.get(..10).unwrap_or(s).to_string())
}

/// Number of change rows in a pipeline delta log; 0 when absent.
pub fn delta_changes(delta_path: &Path) -> usize {
    fs::read_to_string(delta_path)
        .map(|text| build_table(&text, false).len())
        .unwrap_or(0)
}

/// Delta log written next to a pipeline output, `casps.csv` → `casps_delta.csv`.
pub fn delta_path_for(output: &Path) -> Option<PathBuf> {
    let stem = output.file_stem()?.to_str()?;
    Some(output.with_file_name(format!("{}_delta.csv", stem)))
}

pub fn casps_delta_changes(pipeline_dir: &Path) -> usize {
    delta_changes(&pipeline_dir.join(CASPS_DELTA_FILE))
}

/// Next value of the stored "CASPs last updated" date.
pub fn refresh_casps_last_updated(
    stored: Option<&str>,
    pipeline_dir: &Path,
    today: NaiveDate,
) -> String {
    let changes = casps_delta_changes(pipeline_dir);
    match stored {
        Some(prev) if changes == 0 && !prev.is_empty() => prev.to_string(),
        _ => {
            let date = casps_meta_date(pipeline_dir)
                .unwrap_or_else(|| today.format("%Y-%m-%d").to_string());
            info!(changes, %date, "CASP last-updated date refreshed");
            date
        }
    }
}
