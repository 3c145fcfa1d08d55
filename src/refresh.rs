// src/refresh.rs
//
// One dashboard refresh: snapshot dates → cache reuse or live fetch →
// caches and state → page splice.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::fetch::{DatasetSource, SourceResolver, Transport};
use crate::html::{self, format_display_date, LabelDates, SpliceReport};
use crate::normalize::{normalize_casps, normalize_emts, normalize_non_compliant, DashboardData};
use crate::snapshot::{self, fetch_dates, meta, SnapshotDates, SnapshotState};

#[derive(Debug)]
pub struct RefreshOutcome {
    /// Datasets came from the local caches instead of the network.
    pub reused_cache: bool,
    pub data: DashboardData,
    pub state: SnapshotState,
    pub report: SpliceReport,
}

/// Resolve and normalize all three datasets concurrently.
#[instrument(level = "info", skip_all)]
pub async fn fetch_live<T: Transport>(resolver: &SourceResolver<'_, T>, config: &Config) -> Result<DashboardData> {
    let emt_source = DatasetSource::emts(config);
    let casp_source = DatasetSource::casps(config);
    let nc_source = DatasetSource::non_compliant(config);

    let (emts, casps, non_compliant) = tokio::try_join!(
        resolver.resolve(&emt_source),
        resolver.resolve(&casp_source),
        resolver.resolve(&nc_source),
    )?;

    let data = DashboardData {
        emts: normalize_emts(&emts.rows),
        casps: normalize_casps(&casps.rows, casps.variant()),
        non_compliant: normalize_non_compliant(&non_compliant.rows, non_compliant.variant()),
    };

    for (name, count, location) in [
        ("EMT", data.emts.len(), &emts.location),
        ("CASP", data.casps.len(), &casps.location),
        ("non-compliant", data.non_compliant.len(), &non_compliant.location),
    ] {
        if count == 0 {
            bail!("{} dataset from {} is empty after normalization", name, location);
        }
    }
    Ok(data)
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|s| !s.is_empty())
}

fn label_dates(config: &Config, dates: &SnapshotDates, state: &SnapshotState, today: NaiveDate) -> LabelDates {
    let casps_raw = if config.casps_path.is_some() {
        state.casps_last_updated.as_deref().and_then(non_empty)
    } else {
        non_empty(&dates.casps)
    };
    LabelDates {
        emt_raw: non_empty(&dates.emt).map(str::to_string),
        emt_display: format_display_date(non_empty(&dates.emt), today),
        casps_display: format_display_date(casps_raw, today),
    }
}

/// Pipeline files that report changes since the stored state. Any non-empty
/// delta log, or a moved "CASPs last updated" date, counts.
fn pipeline_changed(config: &Config, stored_casps_date: Option<&str>, casps_last_updated: Option<&str>) -> bool {
    if config.pipeline_dir().is_some() && stored_casps_date != casps_last_updated {
        debug!(?stored_casps_date, ?casps_last_updated, "CASP pipeline date moved");
        return true;
    }
    [&config.casps_path, &config.non_compliant_path]
        .into_iter()
        .flatten()
        .filter_map(|path| meta::delta_path_for(path))
        .any(|delta| {
            let changes = meta::delta_changes(&delta);
            if changes > 0 {
                debug!(delta = %delta.display(), changes, "pipeline delta has changes");
            }
            changes > 0
        })
}

/// Run one refresh against `config.html`.
#[instrument(level = "info", skip_all, fields(html = %config.html.display()))]
pub async fn run<T: Transport>(config: &Config, transport: &T) -> Result<RefreshOutcome> {
    let resolver = SourceResolver::new(transport, config);
    let today = Utc::now().date_naive();

    let fetched_dates = fetch_dates(&resolver, config).await;
    let previous = SnapshotState::load(&config.data_dir);
    let stored_casps_date = previous.as_ref().and_then(|p| p.casps_last_updated.clone());

    let casps_last_updated = match config.pipeline_dir() {
        Some(dir) => Some(meta::refresh_casps_last_updated(
            stored_casps_date.as_deref(),
            dir,
            today,
        )),
        None => stored_casps_date.clone(),
    };

    let cached = if config.force {
        info!("--force given; skipping snapshot cache");
        None
    } else if !fetched_dates
        .as_ref()
        .is_some_and(|d| d.unchanged_from(previous.as_ref()))
    {
        None
    } else if pipeline_changed(config, stored_casps_date.as_deref(), casps_last_updated.as_deref()) {
        info!("snapshot unchanged but pipeline files changed; fetching");
        None
    } else {
        let cached = snapshot::load_cached(&config.data_dir);
        if cached.is_none() {
            info!("snapshot unchanged but caches unusable; fetching");
        }
        cached
    };

    let dates = fetched_dates.unwrap_or_default();
    let reused_cache = cached.is_some();
    let data = match cached {
        Some(data) => {
            info!(emt = %dates.emt, casps = %dates.casps, "snapshot unchanged; reusing cached datasets");
            data
        }
        None => {
            let data = fetch_live(&resolver, config).await?;
            snapshot::save_cached(&config.data_dir, &data)?;
            data
        }
    };

    let state = SnapshotState {
        emt_snapshot_date: dates.emt.clone(),
        casps_snapshot_date: dates.casps.clone(),
        last_updated: match (&previous, reused_cache) {
            (Some(prev), true) => prev.last_updated,
            _ => Some(Utc::now()),
        },
        casps_last_updated,
    };
    state.save(&config.data_dir)?;

    let labels = label_dates(config, &dates, &state, today);
    let report = html::update_page(&config.html, &data, &labels)?;

    Ok(RefreshOutcome {
        reused_cache,
        data,
        state,
        report,
    })
}
