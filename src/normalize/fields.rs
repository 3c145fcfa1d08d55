// src/normalize/fields.rs

use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::{parse_leading_int, RawRow};

/// EU/EEA/UK member state codes → display names.
pub static COUNTRY_MAP: &[(&str, &str)] = &[
    ("AT", "Austria"),
    ("BE", "Belgium"),
    ("BG", "Bulgaria"),
    ("HR", "Croatia"),
    ("CY", "Cyprus"),
    ("CZ", "Czech Republic"),
    ("DK", "Denmark"),
    ("EE", "Estonia"),
    ("FI", "Finland"),
    ("FR", "France"),
    ("DE", "Germany"),
    ("GR", "Greece"),
    ("HU", "Hungary"),
    ("IE", "Ireland"),
    ("IT", "Italy"),
    ("LV", "Latvia"),
    ("LT", "Lithuania"),
    ("LU", "Luxembourg"),
    ("MT", "Malta"),
    ("NL", "Netherlands"),
    ("PL", "Poland"),
    ("PT", "Portugal"),
    ("RO", "Romania"),
    ("SK", "Slovakia"),
    ("SI", "Slovenia"),
    ("ES", "Spain"),
    ("SE", "Sweden"),
    ("IS", "Iceland"),
    ("LI", "Liechtenstein"),
    ("NO", "Norway"),
    ("UK", "United Kingdom"),
    ("GB", "United Kingdom"),
];

static MULTI_VALUE_SEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\||,|;|\s{2,}").expect("separator regex is valid"));

/// Map a member state code to its name; unknown values pass through.
pub fn country_name(code: &str) -> String {
    let trimmed = code.trim();
    let upper = trimmed.to_ascii_uppercase();
    COUNTRY_MAP
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Split a multi-valued cell on `|`, `,`, `;` or runs of two or more spaces.
pub fn split_multi(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    MULTI_VALUE_SEP
        .split(raw)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Integer cell, 0 when missing or unparsable.
pub fn int_or_zero(raw: Option<&str>) -> i64 {
    raw.and_then(parse_leading_int).unwrap_or(0)
}

/// `true`/`yes`/`1`/`y`, case-insensitive.
pub fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

/// `true` for blank cells and the pandas `nan` placeholder.
pub fn is_blank(raw: &str) -> bool {
    let t = raw.trim();
    t.is_empty() || t.eq_ignore_ascii_case("nan")
}

/// First non-blank value among candidate headers.
pub fn pick<'a>(row: &'a RawRow, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|h| row.get(*h))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

/// Like [`pick`] but yields an empty string when nothing matches.
pub fn pick_or_empty(row: &RawRow, candidates: &[&str]) -> String {
    pick(row, candidates).unwrap_or("").to_string()
}
