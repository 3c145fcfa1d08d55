// src/pipeline/discover.rs

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, trace};
use url::Url;

use crate::fetch::{get_text_with_retry, RetryPolicy, Transport};

pub const BASE_PAGE_URL: &str = "https://www.esma.europa.eu/esmas-activities/digital-finance-and-innovation/markets-crypto-assets-regulation-mica";

/// All `.csv` links in `html`, resolved against `base`.
pub fn csv_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let selector = match Selector::parse(r#"a[href$=".csv"]"#) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    doc.select(&selector)
        .filter_map(|e| e.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .collect()
}

/// First `.csv` link on the register page whose href matches `pattern`.
pub async fn discover_csv_url<T: Transport>(
    transport: &T,
    page_url: &str,
    pattern: &Regex,
    retry: &RetryPolicy,
) -> Result<Url> {
    let base = Url::parse(page_url).with_context(|| format!("parsing page URL {}", page_url))?;
    let html = get_text_with_retry(transport, page_url, retry).await?;
    let links = csv_links(&html, &base);
    debug!(page = %page_url, links = links.len(), "scanned register page");
    links
        .into_iter()
        .inspect(|u| trace!(url = %u, "candidate CSV"))
        .find(|u| pattern.is_match(u.path()))
        .with_context(|| format!("no CSV link matching {} on {}", pattern, page_url))
}
