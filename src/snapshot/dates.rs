// src/snapshot/dates.rs

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::SnapshotState;
use crate::config::Config;
use crate::fetch::{SourceResolver, Transport};
use crate::table::parse_line;

/// Register "as of" dates for the current run. Empty means unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDates {
    pub emt: String,
    pub casps: String,
}

impl SnapshotDates {
    /// At least one date known and both identical to what the previous run
    /// stored. A sheet that only publishes the EMT date still compares.
    pub fn unchanged_from(&self, previous: Option<&SnapshotState>) -> bool {
        let Some(prev) = previous else {
            return false;
        };
        (!self.emt.is_empty() || !self.casps.is_empty())
            && self.emt == prev.emt_snapshot_date
            && self.casps == prev.casps_snapshot_date
    }

    /// Pick the dates out of header-less key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut dates = SnapshotDates::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref().trim().to_ascii_lowercase().as_str() {
                "snapshot_date" | "emt_snapshot_date" => dates.emt = value.to_string(),
                "casps_snapshot_date" | "casp_snapshot_date" => dates.casps = value.to_string(),
                _ => {}
            }
        }
        dates
    }

    fn from_grid(grid: &[Vec<String>]) -> Self {
        Self::from_pairs(grid.iter().filter_map(|row| match row.as_slice() {
            [k, v, ..] => Some((k.as_str(), v.as_str())),
            _ => None,
        }))
    }

    fn from_csv(text: &str) -> Self {
        let grid: Vec<Vec<String>> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_line)
            .collect();
        Self::from_grid(&grid)
    }
}

async fn try_fetch<T: Transport>(resolver: &SourceResolver<'_, T>, config: &Config) -> Result<SnapshotDates> {
    if let Some(result) = resolver.api_values(&config.dates_range).await {
        match result {
            Ok(grid) => {
                let dates = SnapshotDates::from_grid(&grid);
                if !dates.emt.is_empty() || !dates.casps.is_empty() {
                    return Ok(dates);
                }
                warn!(range = %config.dates_range, "dates range had no snapshot keys; trying CSV");
            }
            Err(e) => warn!(error = %format!("{:#}", e), "dates range failed; trying CSV"),
        }
    }
    let text = resolver.fetch_csv_text(&config.date_url).await?;
    Ok(SnapshotDates::from_csv(&text))
}

/// Current snapshot dates, `None` when they could not be fetched. Keys
/// missing from a fetched sheet come back empty.
#[instrument(level = "info", skip_all)]
pub async fn fetch_dates<T: Transport>(resolver: &SourceResolver<'_, T>, config: &Config) -> Option<SnapshotDates> {
    match try_fetch(resolver, config).await {
        Ok(dates) => {
            info!(emt = %dates.emt, casps = %dates.casps, "snapshot dates");
            Some(dates)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "could not fetch snapshot dates; cache reuse disabled");
            None
        }
    }
}
