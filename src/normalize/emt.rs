// src/normalize/emt.rs

use tracing::debug;

use super::fields::{int_or_zero, is_blank};
use super::EmtRecord;
use crate::table::{parse_leading_int, RawRow};

/// Rows without an issuer (or with the `nan` placeholder) are dropped. `id`
/// comes from `#`, falling back to the row's 1-based position.
pub fn normalize_emts(rows: &[RawRow]) -> Vec<EmtRecord> {
    let get = |row: &RawRow, key: &str| row.get(key).map(|v| v.trim().to_string()).unwrap_or_default();

    let records: Vec<EmtRecord> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let issuer = get(row, "Issuer (HQ)");
            if is_blank(&issuer) {
                return None;
            }
            let id = row
                .get("#")
                .and_then(|v| parse_leading_int(v))
                .unwrap_or(i as i64 + 1);
            Some(EmtRecord {
                id,
                issuer,
                state: get(row, "Home State"),
                authority: get(row, "Competent Authority"),
                tokens: get(row, "Authorised EMT(s)"),
                count: int_or_zero(row.get("Tokens").map(String::as_str)),
                euro: int_or_zero(row.get("Euro").map(String::as_str)),
                usd: int_or_zero(row.get("USD").map(String::as_str)),
                czk: int_or_zero(row.get("CZK").map(String::as_str)),
                gbp: int_or_zero(row.get("GBP").map(String::as_str)),
            })
        })
        .collect();

    debug!(input = rows.len(), kept = records.len(), "normalized EMT rows");
    records
}
