// src/normalize/non_compliant.rs

use std::collections::HashMap;
use tracing::debug;

use super::fields::{country_name, pick, pick_or_empty, split_multi, truthy};
use super::{NonCompliantRecord, SchemaVariant};
use crate::table::RawRow;

const ENTITY_SPREADSHEET: &[&str] = &["ae_commercial_name", "commercial_name", "ae_lei_name"];
const COUNTRY_SPREADSHEET: &[&str] = &["ae_homeMemberState", "ae_home_member_state", "member_state"];
const AUTHORITY_SPREADSHEET: &[&str] = &[
    "ae_competentAuthority",
    "ae_competent_authority",
    "competent_authority",
];
const WEBSITE_SPREADSHEET: &[&str] = &["ae_website", "website"];

const ENTITY_PIPELINE: &[&str] = &["lei_name"];
const COUNTRY_PIPELINE: &[&str] = &["home_member_state"];
const AUTHORITY_PIPELINE: &[&str] = &["competent_authority"];
const WEBSITE_PIPELINE: &[&str] = &["website"];

/// Spreadsheet exports mark fresh listings with a cell reading "new" in a
/// header-less flag column.
fn spreadsheet_is_new(row: &RawRow) -> bool {
    row.iter().any(|(header, value)| {
        let h = header.trim().to_ascii_lowercase();
        let flag_column = h.is_empty() || h == "new" || h == "column_1" || h == "column 1";
        flag_column && value.trim().eq_ignore_ascii_case("new")
    })
}

fn dedupe_key(entity: &str, country: &str, websites: &[String]) -> String {
    format!("{}::{}::{}", entity, country, websites.join("|"))
}

/// Normalize and de-duplicate non-compliant entity rows.
///
/// Rows sharing entity, country and website list collapse into the first
/// occurrence; `is_new` is promoted when any duplicate is new.
pub fn normalize_non_compliant(rows: &[RawRow], variant: SchemaVariant) -> Vec<NonCompliantRecord> {
    let (entity_h, country_h, authority_h, website_h) = match variant {
        SchemaVariant::Spreadsheet => (
            ENTITY_SPREADSHEET,
            COUNTRY_SPREADSHEET,
            AUTHORITY_SPREADSHEET,
            WEBSITE_SPREADSHEET,
        ),
        SchemaVariant::Pipeline => (
            ENTITY_PIPELINE,
            COUNTRY_PIPELINE,
            AUTHORITY_PIPELINE,
            WEBSITE_PIPELINE,
        ),
    };

    let mut records: Vec<NonCompliantRecord> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(entity) = pick(row, entity_h) else {
            continue;
        };
        let country = country_name(&pick_or_empty(row, country_h));
        let websites = split_multi(pick(row, website_h));
        let is_new = match variant {
            SchemaVariant::Spreadsheet => spreadsheet_is_new(row),
            SchemaVariant::Pipeline => row.get("is_new").map(|v| truthy(v)).unwrap_or(false),
        };

        let key = dedupe_key(entity, &country, &websites);
        if let Some(&idx) = seen.get(&key) {
            records[idx].is_new |= is_new;
            continue;
        }

        seen.insert(key, records.len());
        records.push(NonCompliantRecord {
            id: records.len() as i64 + 1,
            entity: entity.to_string(),
            country,
            authority: pick_or_empty(row, authority_h),
            websites,
            is_new,
        });
    }

    debug!(?variant, input = rows.len(), kept = records.len(), "normalized non-compliant rows");
    records
}
