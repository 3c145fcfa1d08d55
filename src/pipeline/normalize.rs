// src/pipeline/normalize.rs
//
// Turns raw ESMA register rows (snake_cased headers) into the export tables
// the dashboard reads back as `casps.csv` / `non_compliant.csv`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::normalize::fields::country_name;
use crate::table::RawRow;

pub const CASP_DATE_COLUMNS: &[&str] = &[
    "ac_authorisation_notification_date",
    "ac_authorisation_end_date",
    "ac_lastupdate",
];

static SERVICE_CODE_MAP: &[(char, &str)] = &[
    ('a', "custody"),
    ('b', "trading platform"),
    ('c', "exchange funds"),
    ('d', "exchange crypto"),
    ('e', "execution"),
    ('f', "placing"),
    ('g', "RTO"),
    ('h', "advice"),
    ('i', "portfolio mgmt"),
    ('j', "transfer"),
];

static SERVICE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([a-j])\.").expect("service code regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRow {
    pub pk: String,
    pub hash: String,
    /// Aligned with [`ExportTable::columns`].
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<ExportRow>,
}

impl ExportTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Latest ISO date found in any of `columns`.
    pub fn latest_date(&self, columns: &[&str]) -> Option<String> {
        let idxs: Vec<usize> = columns.iter().filter_map(|c| self.column(c)).collect();
        self.rows
            .iter()
            .flat_map(|r| idxs.iter().map(move |&i| r.values[i].as_str()))
            .filter(|v| !v.is_empty())
            .max()
            .map(str::to_string)
    }
}

/// `ae_homeMemberState` → `ae_home_member_state`, `Column 1` → `column_1`.
pub fn to_snake_case(name: &str) -> String {
    let spaced = name.trim().replace(' ', "_");
    let mut snake = String::with_capacity(spaced.len() + 4);
    for (i, ch) in spaced.chars().enumerate() {
        if i > 0 && ch.is_uppercase() {
            snake.push('_');
        }
        snake.push(ch);
    }
    snake.replace("__", "_").to_lowercase()
}

/// Replace leading `a.`..`j.` service codes with short labels, drop
/// duplicates and join with ` | `.
pub fn shorten_service_codes(raw: &str) -> String {
    let mut cleaned: Vec<String> = Vec::new();
    for part in raw.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        let label = SERVICE_CODE
            .captures(part)
            .and_then(|c| c[1].to_ascii_lowercase().chars().next())
            .and_then(|code| SERVICE_CODE_MAP.iter().find(|(c, _)| *c == code))
            .map(|(_, label)| label.to_string())
            .unwrap_or_else(|| part.to_string());
        if !cleaned.contains(&label) {
            cleaned.push(label);
        }
    }
    cleaned.join(" | ")
}

/// Normalize a register date to `YYYY-MM-DD`; empty when unparsable.
pub fn parse_iso_date(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return String::new();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.date_naive().to_string();
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return dt.date().to_string();
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.to_string();
        }
    }
    String::new()
}

fn hash_values<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let mut digest = Sha256::new();
    for v in values {
        digest.update(v.as_bytes());
    }
    digest.finalize().iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn primary_key(state: &str, authority: &str, name: &str) -> String {
    format!(
        "{}|{}|{}",
        state.to_uppercase(),
        authority.to_lowercase(),
        name.to_lowercase()
    )
}

fn first_of(row: &RawRow, candidates: &[&str]) -> String {
    candidates
        .iter()
        .find_map(|c| row.get(*c))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn member_state(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if matches!(upper.as_str(), "" | "NAN" | "NONE" | "NULL") {
        return String::new();
    }
    country_name(raw)
}

/// CASP register rows → `pk, competent_authority, home_member_state,
/// lei_name, website, service_codes` plus whichever date columns exist.
pub fn normalize_casps(rows: &[RawRow]) -> ExportTable {
    let date_cols: Vec<&str> = CASP_DATE_COLUMNS
        .iter()
        .copied()
        .filter(|c| rows.iter().any(|r| r.contains_key(*c)))
        .collect();

    let mut columns: Vec<String> = [
        "pk",
        "competent_authority",
        "home_member_state",
        "lei_name",
        "website",
        "service_codes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    columns.extend(date_cols.iter().map(|s| s.to_string()));

    let out_rows = rows
        .iter()
        .map(|row| {
            let authority = first_of(row, &["ae_competent_authority"]);
            let state = member_state(&first_of(row, &["ae_home_member_state"]));
            let name = first_of(row, &["ae_lei_name"]);
            let website = first_of(row, &["ae_website"]);
            let services = shorten_service_codes(&first_of(row, &["ac_service_code"]));

            let mut business = vec![authority, state, name, website, services];
            business.extend(date_cols.iter().map(|c| parse_iso_date(&first_of(row, &[*c]))));

            let pk = primary_key(&business[1], &business[0], &business[2]);
            let hash = hash_values(business.iter().map(String::as_str));
            let mut values = vec![pk.clone()];
            values.extend(business);
            ExportRow { pk, hash, values }
        })
        .collect();

    ExportTable {
        columns,
        rows: out_rows,
    }
}

/// Non-compliant register rows → `pk, competent_authority,
/// home_member_state, lei_name, website, is_new`. Rows without a name are
/// dropped.
pub fn normalize_non_compliant(rows: &[RawRow]) -> ExportTable {
    let columns = [
        "pk",
        "competent_authority",
        "home_member_state",
        "lei_name",
        "website",
        "is_new",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let out_rows = rows
        .iter()
        .filter_map(|row| {
            let name = first_of(row, &["ae_lei_name", "commercial_name"]);
            if name.is_empty() {
                return None;
            }
            let authority = first_of(
                row,
                &["ae_competent_authority", "ae_competentauthority", "competent_authority"],
            );
            let state = member_state(&first_of(
                row,
                &["ae_home_member_state", "ae_homememberstate", "member_state"],
            ));
            let website = first_of(row, &["ae_website", "website"]);
            let is_new = row
                .get("column_1")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("new"))
                .to_string();

            let pk = primary_key(&state, &authority, &name);
            let hash = hash_values([
                authority.as_str(),
                state.as_str(),
                name.as_str(),
                website.as_str(),
                is_new.as_str(),
            ]);
            Some(ExportRow {
                values: vec![pk.clone(), authority, state, name, website, is_new],
                pk,
                hash,
            })
        })
        .collect();

    ExportTable {
        columns,
        rows: out_rows,
    }
}
