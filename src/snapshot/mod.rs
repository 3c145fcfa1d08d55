// src/snapshot/mod.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{debug, info};

use crate::normalize::DashboardData;
use crate::pipeline::output::atomic_write;

pub mod dates;
pub mod meta;

pub use dates::{fetch_dates, SnapshotDates};

pub const STATE_FILE: &str = "dashboard_state.json";
pub const EMTS_FILE: &str = "emts.json";
pub const CASPS_FILE: &str = "casps.json";
pub const NON_COMPLIANT_FILE: &str = "non-compliant.json";

/// What the previous run saw, persisted between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    #[serde(default)]
    pub emt_snapshot_date: String,
    #[serde(default)]
    pub casps_snapshot_date: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Display date for pipeline-backed CASPs, moved only when the
    /// pipeline reports changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub casps_last_updated: Option<String>,
}

impl SnapshotState {
    /// `None` when the file is absent or unreadable.
    pub fn load(data_dir: &Path) -> Option<Self> {
        read_json(&data_dir.join(STATE_FILE))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        write_json(&data_dir.join(STATE_FILE), self)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cache file unavailable");
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cache file malformed");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    atomic_write(path, &text)
}

/// The three cached datasets, or `None` if any is missing, malformed or
/// empty.
pub fn load_cached(data_dir: &Path) -> Option<DashboardData> {
    let data = DashboardData {
        emts: read_json(&data_dir.join(EMTS_FILE))?,
        casps: read_json(&data_dir.join(CASPS_FILE))?,
        non_compliant: read_json(&data_dir.join(NON_COMPLIANT_FILE))?,
    };
    if data.emts.is_empty() || data.casps.is_empty() || data.non_compliant.is_empty() {
        debug!("cached datasets incomplete");
        return None;
    }
    Some(data)
}

pub fn save_cached(data_dir: &Path, data: &DashboardData) -> Result<()> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    write_json(&data_dir.join(EMTS_FILE), &data.emts)?;
    write_json(&data_dir.join(CASPS_FILE), &data.casps)?;
    write_json(&data_dir.join(NON_COMPLIANT_FILE), &data.non_compliant)?;
    info!(
        emts = data.emts.len(),
        casps = data.casps.len(),
        non_compliant = data.non_compliant.len(),
        dir = %data_dir.display(),
        "wrote dataset caches"
    );
    Ok(())
}
