// src/html/mod.rs
//
// Rewrites the data arrays and "Data as of" labels embedded in the static
// dashboard page. Works on plain text: a `/*name:begin*/ ... /*name:end*/`
// marker pair is preferred, otherwise the `name = [ ... ];` declaration is
// located by anchor text.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::{fs, path::Path};
use tracing::{debug, error, info};

use crate::normalize::DashboardData;
use crate::pipeline::output::atomic_write;

pub mod dates;

pub use dates::format_display_date;

pub const EMT_ARRAY: &str = "data";
pub const CASP_ARRAY: &str = "caspsData";
pub const NON_COMPLIANT_ARRAY: &str = "nonCompliantData";

static EMT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(Source:\s*ESMA[^<]*?EMT[^<]*?Data as of\s*)[^<]*").expect("EMT label regex")
});
static CASP_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(Source:\s*ESMA[^<]*?CASP[^<]*?Data as of\s*)[^<]*").expect("CASP label regex")
});
static SNAPSHOT_CONST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"const snapshotDate = '(?:[^'\\\n]|\\.)*';").expect("snapshotDate regex"));

/// Display strings for the page labels.
#[derive(Clone, Debug, Default)]
pub struct LabelDates {
    /// Raw EMT snapshot date, written into `const snapshotDate`.
    pub emt_raw: Option<String>,
    pub emt_display: String,
    pub casps_display: String,
}

/// Which anchors were rewritten and which could not be found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpliceReport {
    pub replaced: Vec<String>,
    pub missing: Vec<String>,
}

impl SpliceReport {
    fn record(&mut self, anchor: &str, found: bool) {
        if found {
            self.replaced.push(anchor.to_string());
        } else {
            error!(anchor, "anchor not found in page; left unchanged");
            self.missing.push(anchor.to_string());
        }
    }
}

/// Serialize as a JS array literal. `;` and `</` only ever occur inside
/// JSON strings, so escaping them keeps the literal free of `];` and safe
/// inside a `<script>` element.
pub fn to_js_literal<T: Serialize>(records: &[T]) -> Result<String> {
    let json = serde_json::to_string_pretty(records).context("serializing page data")?;
    Ok(json
        .replace(';', "\\u003b")
        .replace("</", "<\\/")
        .replace('\n', "\n    "))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// First occurrence of `anchor` that is not the tail of a longer identifier.
fn find_anchor(doc: &str, anchor: &str) -> Option<usize> {
    doc.match_indices(anchor)
        .map(|(i, _)| i)
        .find(|&i| !doc[..i].chars().next_back().is_some_and(is_ident_char))
}

fn replace_between_markers(doc: &str, name: &str, literal: &str) -> Option<String> {
    let begin = format!("/*{}:begin*/", name);
    let end = format!("/*{}:end*/", name);
    let start = doc.find(&begin)? + begin.len();
    let stop = start + doc[start..].find(&end)?;
    Some(format!("{}{}{}", &doc[..start], literal, &doc[stop..]))
}

/// Replace the array literal declared as `name`, trying markers first and
/// then `const name = [`, `name = [`, `let name = [`.
pub fn replace_array(doc: &str, name: &str, literal: &str) -> Option<String> {
    if let Some(out) = replace_between_markers(doc, name, literal) {
        debug!(name, "replaced between markers");
        return Some(out);
    }
    for keyword in ["const ", "", "let "] {
        let anchor = format!("{}{} = [", keyword, name);
        let Some(pos) = find_anchor(doc, &anchor) else {
            continue;
        };
        let open = pos + anchor.len() - 1;
        let Some(close) = doc[open..].find("];") else {
            continue;
        };
        let stop = open + close + 1;
        return Some(format!("{}{}{}", &doc[..open], literal, &doc[stop..]));
    }
    None
}

fn replace_label(doc: &str, re: &Regex, date: &str) -> Option<String> {
    if !re.is_match(doc) {
        return None;
    }
    Some(
        re.replace_all(doc, |caps: &Captures| format!("{}{}", &caps[1], date))
            .into_owned(),
    )
}

/// Body of a single-quoted JS string that cannot close the `<script>`.
/// Control characters are dropped.
fn js_single_quoted(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .fold(String::with_capacity(raw.len()), |mut out, c| {
            if c == '\\' || c == '\'' || (c == '/' && out.ends_with('<')) {
                out.push('\\');
            }
            out.push(c);
            out
        })
}

/// Apply every rewrite to `doc`. Missing anchors are reported and skipped;
/// the remaining anchors are still rewritten.
pub fn splice(doc: &str, data: &DashboardData, dates: &LabelDates) -> Result<(String, SpliceReport)> {
    let mut out = doc.to_string();
    let mut report = SpliceReport::default();

    let arrays = [
        (EMT_ARRAY, to_js_literal(&data.emts)?),
        (CASP_ARRAY, to_js_literal(&data.casps)?),
        (NON_COMPLIANT_ARRAY, to_js_literal(&data.non_compliant)?),
    ];
    for (name, literal) in &arrays {
        let replaced = replace_array(&out, name, literal);
        report.record(name, replaced.is_some());
        if let Some(next) = replaced {
            out = next;
        }
    }

    for (anchor, re, date) in [
        ("EMT data-as-of label", &*EMT_LABEL, &dates.emt_display),
        ("CASP data-as-of label", &*CASP_LABEL, &dates.casps_display),
    ] {
        let replaced = replace_label(&out, re, date);
        report.record(anchor, replaced.is_some());
        if let Some(next) = replaced {
            out = next;
        }
    }

    if let Some(raw) = dates.emt_raw.as_deref().filter(|s| !s.is_empty()) {
        if SNAPSHOT_CONST.is_match(&out) {
            let line = format!("const snapshotDate = '{}';", js_single_quoted(raw));
            out = SNAPSHOT_CONST
                .replace_all(&out, regex::NoExpand(&line))
                .into_owned();
        } else {
            debug!("no snapshotDate constant in page");
        }
    }

    Ok((out, report))
}

/// Read, splice and write back the page at `path`.
pub fn update_page(path: &Path, data: &DashboardData, dates: &LabelDates) -> Result<SpliceReport> {
    let doc = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let (out, report) = splice(&doc, data, dates)?;
    atomic_write(path, &out)?;
    info!(
        path = %path.display(),
        replaced = report.replaced.len(),
        missing = report.missing.len(),
        "page updated"
    );
    Ok(report)
}
