// src/table/mod.rs
//
// Minimal CSV dialect used by the spreadsheet exports: a double quote toggles
// quoted mode, commas split only outside quotes, no quote escaping.

use std::collections::BTreeMap;

/// One data row keyed by trimmed header.
pub type RawRow = BTreeMap<String, String>;

/// Split a single CSV line into fields.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Leading-integer parse: optional sign followed by digits, anything after
/// the digits is ignored. `None` when no digit leads the string.
pub fn parse_leading_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// `true` when the row carries a usable `#` identifier.
pub fn has_numeric_id(row: &RawRow) -> bool {
    match row.get("#") {
        Some(id) => {
            let id = id.trim();
            !id.is_empty() && !id.eq_ignore_ascii_case("nan") && parse_leading_int(id).is_some()
        }
        None => false,
    }
}

/// Zip a header row against data rows. Missing trailing cells become empty
/// strings; cells past the header are dropped.
pub fn rows_from_cells<I>(headers: &[String], cells: I, require_numeric_id: bool) -> Vec<RawRow>
where
    I: IntoIterator<Item = Vec<String>>,
{
    cells
        .into_iter()
        .map(|values| {
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    let v = values.get(i).map(|v| v.trim()).unwrap_or("");
                    (h.clone(), v.to_string())
                })
                .collect::<RawRow>()
        })
        .filter(|row| !require_numeric_id || has_numeric_id(row))
        .collect()
}

/// Build rows from a full CSV body: first line is the header, blank lines
/// are skipped.
pub fn build_table(text: &str, require_numeric_id: bool) -> Vec<RawRow> {
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let headers: Vec<String> = match lines.next() {
        Some(h) => parse_line(h.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect(),
        None => return Vec::new(),
    };

    let cells = lines.filter(|l| !l.trim().is_empty()).map(parse_line);
    rows_from_cells(&headers, cells, require_numeric_id)
}
