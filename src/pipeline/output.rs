// src/pipeline/output.rs

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::normalize::ExportTable;
use super::state::DiffResult;

pub const META_FILE: &str = "meta.json";

/// Write via a sibling `.tmp` file and rename, creating parents as needed.
pub fn atomic_write(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn output_files(name: &str) -> [String; 3] {
    [
        format!("{}.csv", name),
        format!("{}.json", name),
        format!("{}_delta.csv", name),
    ]
}

/// Copy the current outputs of `name` into `<backup_dir>/<name>/<stamp>/`.
/// Returns the backup directory when anything was copied.
pub fn backup_existing_outputs(
    out_dir: &Path,
    backup_dir: &Path,
    name: &str,
    stamp: &str,
) -> Result<Option<PathBuf>> {
    let dest = backup_dir.join(name).join(stamp);
    let mut copied = false;
    for file in output_files(name) {
        let src = out_dir.join(&file);
        if !src.is_file() {
            continue;
        }
        fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))?;
        fs::copy(&src, dest.join(&file))
            .with_context(|| format!("backing up {}", src.display()))?;
        copied = true;
    }
    if copied {
        debug!(dest = %dest.display(), "backed up previous outputs");
        Ok(Some(dest))
    } else {
        Ok(None)
    }
}

fn to_csv(columns: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(columns)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().context("flushing CSV")?;
    Ok(String::from_utf8(bytes)?)
}

fn json_cell(column: &str, value: &str) -> Value {
    if column == "is_new" {
        Value::Bool(value == "true")
    } else {
        Value::String(value.to_string())
    }
}

fn to_json(table: &ExportTable) -> Result<String> {
    let records: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let obj: Map<String, Value> = table
                .columns
                .iter()
                .zip(&row.values)
                .map(|(c, v)| (c.clone(), json_cell(c, v)))
                .collect();
            Value::Object(obj)
        })
        .collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

fn delta_rows(diff: &DiffResult) -> Vec<Vec<String>> {
    let tagged = |pks: &[String], action: &str| {
        pks.iter()
            .map(|pk| vec![pk.clone(), action.to_string()])
            .collect::<Vec<_>>()
    };
    let mut rows = tagged(&diff.new, "new");
    rows.extend(tagged(&diff.updated, "update"));
    rows.extend(tagged(&diff.removed, "remove"));
    rows
}

/// Merge `metadata` into `meta.json` under `source`, converting a legacy
/// flat file into the per-dataset layout.
pub fn update_meta(out_dir: &Path, source: &str, mut metadata: Map<String, Value>) -> Result<()> {
    let path = out_dir.join(META_FILE);
    metadata.insert("source".into(), Value::String(source.to_string()));
    metadata
        .entry("generated_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)));

    let mut merged = Map::new();
    if let Ok(text) = fs::read_to_string(&path) {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(raw)) => {
                let legacy = raw.contains_key("source")
                    && ["total_rows", "new_rows", "updated_rows", "removed_rows"]
                        .iter()
                        .any(|k| raw.contains_key(*k));
                if legacy {
                    let dataset = raw
                        .get("source")
                        .and_then(Value::as_str)
                        .unwrap_or(source)
                        .to_string();
                    let flat: Map<String, Value> = raw
                        .iter()
                        .filter(|(k, v)| *k == "source" || !v.is_object())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    merged.insert(dataset, Value::Object(flat));
                }
                for (k, v) in raw {
                    if v.get("source").is_some() {
                        merged.insert(k, v);
                    }
                }
            }
            Ok(_) => warn!(path = %path.display(), "meta.json is not an object; replacing"),
            Err(e) => warn!(path = %path.display(), error = %e, "meta.json malformed; replacing"),
        }
    }

    merged.insert(source.to_string(), Value::Object(metadata));
    atomic_write(&path, &serde_json::to_string_pretty(&Value::Object(merged))?)
}

/// Back up, then write `<name>.csv`, `<name>.json`, `<name>_delta.csv` and
/// the dataset's `meta.json` entry. Refuses to replace outputs with an empty
/// dataset.
pub fn write_dataset(
    out_dir: &Path,
    backup_dir: &Path,
    name: &str,
    table: &ExportTable,
    diff: &DiffResult,
    meta_extra: Map<String, Value>,
) -> Result<()> {
    if table.rows.is_empty() {
        bail!("{} dataset is empty; refusing to overwrite outputs", name);
    }

    let stamp = Utc::now().format("%Y%m%d%H%M%SZ").to_string();
    backup_existing_outputs(out_dir, backup_dir, name, &stamp)?;

    let [csv_name, json_name, delta_name] = output_files(name);
    let values: Vec<Vec<String>> = table.rows.iter().map(|r| r.values.clone()).collect();
    atomic_write(&out_dir.join(csv_name), &to_csv(&table.columns, &values)?)?;
    atomic_write(&out_dir.join(json_name), &to_json(table)?)?;
    atomic_write(
        &out_dir.join(delta_name),
        &to_csv(&["pk".to_string(), "action".to_string()], &delta_rows(diff))?,
    )?;

    let mut meta = Map::new();
    meta.insert("total_rows".into(), table.rows.len().into());
    meta.insert("new_rows".into(), diff.new.len().into());
    meta.insert("updated_rows".into(), diff.updated.len().into());
    meta.insert("removed_rows".into(), diff.removed.len().into());
    meta.extend(meta_extra);
    update_meta(out_dir, name, meta)?;

    info!(name, rows = table.rows.len(), out = %out_dir.display(), "wrote dataset");
    Ok(())
}
