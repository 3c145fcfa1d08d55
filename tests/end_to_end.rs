use anyhow::{bail, Result};
use micar_dashboard::{
    config::Config,
    fetch::{HttpResponse, Transport},
    normalize::EmtRecord,
    refresh,
    snapshot::{EMTS_FILE, STATE_FILE},
};
use serde_json::Value;
use std::{collections::HashMap, fs, path::Path, sync::Mutex};
use tempfile::tempdir;

const EMT_CSV: &str = "#,Issuer (HQ),Home State,Competent Authority,Authorised EMT(s),Tokens,Euro,USD,CZK,GBP\n\
1,Circle Internet Financial,France,ACPR,\"EURC, USDC\",2,1,1,0,0\n\
2,Société Générale FORGE,France,ACPR,EURCV,1,one,0,0,0\n\
3,Banking Circle,Luxembourg,CSSF,EURI,1,1,0,0,0\n";

const CASP_CSV: &str = "ae_lei_name,ae_competentAuthority,ae_homeMemberState,ac_serviceCode,ae_website\n\
Alpha Custody GmbH,BaFin,DE,a. custody | j. transfer,alpha.de\n";

const NC_CSV: &str = "Column 1,ae_commercial_name,ae_homeMemberState,ae_competentAuthority,ae_website\n\
new,Scam Ltd,IT,CONSOB,scam.io\n\
,Scam Ltd,IT,CONSOB,scam.io\n";

const PAGE: &str = r#"<!doctype html>
<html><body>
<p>Source: ESMA interim MiCA register (EMTs). Data as of 1 January 2024</p>
<p>Source: ESMA interim MiCA register (CASPs). Data as of 1 January 2024</p>
<script>
    const snapshotDate = '2024-01-01';
    const data = [
        {"id": 0}
    ];
    const caspsData = [];
    const nonCompliantData = [];
</script>
</body></html>"#;

/// Serves fixed bodies by URL suffix and counts requests.
struct FixtureTransport {
    bodies: HashMap<&'static str, String>,
    hits: Mutex<HashMap<&'static str, usize>>,
}

impl FixtureTransport {
    fn new(dates: &str) -> Self {
        let bodies = HashMap::from([
            ("/dates", dates.to_string()),
            ("/emts", EMT_CSV.to_string()),
            ("/casps", CASP_CSV.to_string()),
            ("/non-compliant", NC_CSV.to_string()),
        ]);
        Self {
            bodies,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn hits(&self, suffix: &str) -> usize {
        self.hits.lock().unwrap().get(suffix).copied().unwrap_or(0)
    }

    fn data_hits(&self) -> usize {
        ["/emts", "/casps", "/non-compliant"]
            .iter()
            .map(|s| self.hits(s))
            .sum()
    }
}

impl Transport for FixtureTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let Some((suffix, body)) = self.bodies.iter().find(|(s, _)| url.ends_with(**s)) else {
            bail!("unexpected request to {}", url);
        };
        *self.hits.lock().unwrap().entry(*suffix).or_default() += 1;
        Ok(HttpResponse {
            status: 200,
            body: body.clone(),
        })
    }
}

fn config(root: &Path) -> Config {
    let mut cfg = Config::with_defaults();
    cfg.csv_url = "https://fixtures.test/emts".into();
    cfg.date_url = "https://fixtures.test/dates".into();
    cfg.casps_url = "https://fixtures.test/casps".into();
    cfg.non_compliant_url = "https://fixtures.test/non-compliant".into();
    cfg.data_dir = root.join("data");
    cfg.backups_dir = root.join("data").join("backups");
    cfg.html = root.join("index.html");
    fs::write(&cfg.html, PAGE).unwrap();
    cfg
}

/// Text of the array literal assigned by `const <name> = `.
fn array_literal<'a>(page: &'a str, name: &str) -> &'a str {
    let anchor = format!("const {} = ", name);
    let start = page.find(&anchor).unwrap() + anchor.len();
    let end = start + page[start..].find("];").unwrap() + 1;
    &page[start..end]
}

#[tokio::test]
async fn malformed_numbers_default_to_zero_and_page_round_trips() {
    let tmp = tempdir().unwrap();
    let cfg = config(tmp.path());
    let transport = FixtureTransport::new("snapshot_date,2025-03-05\ncasps_snapshot_date,2025-02-28\n");

    let outcome = refresh::run(&cfg, &transport).await.unwrap();
    assert!(outcome.report.missing.is_empty(), "{:?}", outcome.report.missing);

    let emts = &outcome.data.emts;
    assert_eq!(emts.len(), 3);
    assert_eq!(emts[1].issuer, "Société Générale FORGE");
    assert_eq!(emts[1].euro, 0);
    assert_eq!(emts[0].tokens, "EURC, USDC");

    let page = fs::read_to_string(&cfg.html).unwrap();
    let spliced: Vec<EmtRecord> = serde_json::from_str(array_literal(&page, "data")).unwrap();
    assert_eq!(&spliced, emts);

    let nc: Value = serde_json::from_str(array_literal(&page, "nonCompliantData")).unwrap();
    assert_eq!(nc.as_array().unwrap().len(), 1);
    assert_eq!(nc[0]["isNew"], Value::Bool(true));
    assert_eq!(nc[0]["country"], "Italy");

    let casps: Value = serde_json::from_str(array_literal(&page, "caspsData")).unwrap();
    assert_eq!(casps[0]["memberState"], "Germany");
    assert_eq!(casps[0]["services"], serde_json::json!(["a. custody", "j. transfer"]));

    assert!(page.contains("(EMTs). Data as of 5 March 2025</p>"));
    assert!(page.contains("(CASPs). Data as of 28 February 2025</p>"));
    assert!(page.contains("const snapshotDate = '2025-03-05';"));
}

#[tokio::test]
async fn unchanged_snapshot_skips_data_fetches() {
    let tmp = tempdir().unwrap();
    let cfg = config(tmp.path());
    let dates = "snapshot_date,2025-03-05\ncasps_snapshot_date,2025-02-28\n";

    let first = FixtureTransport::new(dates);
    refresh::run(&cfg, &first).await.unwrap();
    assert_eq!(first.data_hits(), 3);
    assert!(cfg.data_dir.join(STATE_FILE).is_file());

    let second = FixtureTransport::new(dates);
    let outcome = refresh::run(&cfg, &second).await.unwrap();
    assert!(outcome.reused_cache);
    assert_eq!(second.hits("/dates"), 1);
    assert_eq!(second.data_hits(), 0);
    assert_eq!(outcome.data.emts.len(), 3);
}

#[tokio::test]
async fn changed_snapshot_fetches_and_overwrites_cache() {
    let tmp = tempdir().unwrap();
    let cfg = config(tmp.path());

    let first = FixtureTransport::new("snapshot_date,2025-03-05\ncasps_snapshot_date,2025-02-28\n");
    refresh::run(&cfg, &first).await.unwrap();

    // tamper with the cache so an overwrite is observable
    fs::write(cfg.data_dir.join(EMTS_FILE), r#"[{"id":1,"issuer":"stale","state":"","authority":"","tokens":"","count":0,"euro":0,"usd":0,"czk":0,"gbp":0}]"#).unwrap();

    let second = FixtureTransport::new("snapshot_date,2025-04-01\ncasps_snapshot_date,2025-02-28\n");
    let outcome = refresh::run(&cfg, &second).await.unwrap();
    assert!(!outcome.reused_cache);
    assert_eq!(second.data_hits(), 3);

    let cached: Vec<EmtRecord> =
        serde_json::from_str(&fs::read_to_string(cfg.data_dir.join(EMTS_FILE)).unwrap()).unwrap();
    assert_eq!(cached.len(), 3);
    assert_eq!(outcome.state.emt_snapshot_date, "2025-04-01");
}
