// src/normalize/mod.rs

pub mod casp;
pub mod emt;
pub mod fields;
pub mod non_compliant;

use serde::{Deserialize, Serialize};

pub use casp::normalize_casps;
pub use emt::normalize_emts;
pub use non_compliant::normalize_non_compliant;

/// Which header set a batch of rows uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaVariant {
    /// Raw register columns as exported from the shared spreadsheet.
    Spreadsheet,
    /// Columns written by the `esma-pipeline` binary.
    Pipeline,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmtRecord {
    pub id: i64,
    pub issuer: String,
    pub state: String,
    pub authority: String,
    pub tokens: String,
    pub count: i64,
    pub euro: i64,
    pub usd: i64,
    pub czk: i64,
    pub gbp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaspRecord {
    pub id: i64,
    pub name: String,
    pub authority: String,
    pub member_state: String,
    pub services: Vec<String>,
    pub websites: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonCompliantRecord {
    pub id: i64,
    pub entity: String,
    pub country: String,
    pub authority: String,
    pub websites: Vec<String>,
    pub is_new: bool,
}

/// The three datasets the page renders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DashboardData {
    pub emts: Vec<EmtRecord>,
    pub casps: Vec<CaspRecord>,
    pub non_compliant: Vec<NonCompliantRecord>,
}
