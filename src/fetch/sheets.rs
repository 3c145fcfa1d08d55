// src/fetch/sheets.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{get_text_with_retry, RetryPolicy, Transport};
use crate::config::SheetsApi;
use crate::table::{rows_from_cells, RawRow};

const VALUES_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// `.../spreadsheets/{id}/values/{range}?key={key}` with the range escaped.
pub fn values_url(api: &SheetsApi, range: &str) -> Result<Url> {
    let mut url = Url::parse(VALUES_BASE)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("values API base cannot take path segments"))?
        .pop_if_empty()
        .extend([api.sheet_id.as_str(), "values", range]);
    url.query_pairs_mut().append_pair("key", &api.key);
    Ok(url)
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode a values API response body into a grid of strings.
pub fn parse_values(body: &str) -> Result<Vec<Vec<String>>> {
    let range: ValueRange =
        serde_json::from_str(body).context("decoding Sheets values response")?;
    Ok(range
        .values
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

/// Fetch a range as a raw grid.
pub async fn fetch_values<T: Transport>(
    transport: &T,
    api: &SheetsApi,
    range: &str,
    retry: &RetryPolicy,
) -> Result<Vec<Vec<String>>> {
    let url = values_url(api, range)?;
    let body = get_text_with_retry(transport, url.as_str(), retry).await?;
    parse_values(&body).with_context(|| format!("range {}", range))
}

/// First grid row is the header; shorter rows are padded.
pub fn rows_from_values(grid: Vec<Vec<String>>, require_numeric_id: bool) -> Vec<RawRow> {
    let mut rows = grid.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
    rows_from_cells(&headers, rows, require_numeric_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_escaped_into_path() {
        let api = SheetsApi {
            key: "k 1".into(),
            sheet_id: "abc".into(),
        };
        let url = values_url(&api, "EMTs!A:J").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/EMTs!A:J?key=k+1"
        );
    }

    #[test]
    fn grid_to_rows_pads_ragged_rows() {
        let body = r##"{"range":"EMTs!A1:C3","values":[["#","Issuer (HQ)","Euro"],["1","Circle",3],["x"]]}"##;
        let rows = rows_from_values(parse_values(body).unwrap(), false);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Euro"], "3");
        assert_eq!(rows[1]["#"], "x");
        assert_eq!(rows[1]["Euro"], "");

        let filtered = rows_from_values(parse_values(body).unwrap(), true);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn missing_values_means_no_rows() {
        assert!(parse_values(r#"{"range":"X!A:B"}"#).unwrap().is_empty());
        assert!(rows_from_values(Vec::new(), false).is_empty());
    }
}
