// src/normalize/casp.rs

use tracing::debug;

use super::fields::{country_name, pick, pick_or_empty, split_multi};
use super::{CaspRecord, SchemaVariant};
use crate::table::RawRow;

/// Header candidates for one canonical CASP field, per source.
struct CaspHeaders {
    name: &'static [&'static str],
    authority: &'static [&'static str],
    member_state: &'static [&'static str],
    services: &'static [&'static str],
    websites: &'static [&'static str],
}

const SPREADSHEET: CaspHeaders = CaspHeaders {
    name: &["ae_lei_name"],
    authority: &["ae_competentAuthority", "ae_competent_authority"],
    member_state: &["ae_homeMemberState", "ae_home_member_state"],
    services: &["ac_serviceCode", "ac_service_code"],
    websites: &["ae_website"],
};

const PIPELINE: CaspHeaders = CaspHeaders {
    name: &["lei_name"],
    authority: &["competent_authority"],
    member_state: &["home_member_state"],
    services: &["service_codes"],
    websites: &["website"],
};

fn headers_for(variant: SchemaVariant) -> &'static CaspHeaders {
    match variant {
        SchemaVariant::Spreadsheet => &SPREADSHEET,
        SchemaVariant::Pipeline => &PIPELINE,
    }
}

/// Rows without a name are dropped; ids are assigned sequentially from 1.
pub fn normalize_casps(rows: &[RawRow], variant: SchemaVariant) -> Vec<CaspRecord> {
    let h = headers_for(variant);

    let records: Vec<CaspRecord> = rows
        .iter()
        .filter_map(|row| {
            let name = pick(row, h.name)?.to_string();
            Some((name, row))
        })
        .enumerate()
        .map(|(i, (name, row))| CaspRecord {
            id: i as i64 + 1,
            name,
            authority: pick_or_empty(row, h.authority),
            member_state: country_name(&pick_or_empty(row, h.member_state)),
            services: split_multi(pick(row, h.services)),
            websites: split_multi(pick(row, h.websites)),
        })
        .collect();

    debug!(?variant, input = rows.len(), kept = records.len(), "normalized CASP rows");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::build_table;

    #[test]
    fn spreadsheet_headers() {
        let csv = "ae_lei_name,ae_competentAuthority,ae_homeMemberState,ac_serviceCode,ae_website\n\
                   Bitpanda GmbH,FMA,AT,\"a. custody| b. trading platform\",bitpanda.com\n\
                   ,FMA,AT,a.,x.com\n\
                   Coinbase,CBI,IE,,\"coinbase.com, coinbase.ie\"\n";
        let recs = normalize_casps(&build_table(csv, false), SchemaVariant::Spreadsheet);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, 1);
        assert_eq!(recs[0].member_state, "Austria");
        assert_eq!(recs[0].services, vec!["a. custody", "b. trading platform"]);
        assert_eq!(recs[1].id, 2);
        assert_eq!(recs[1].name, "Coinbase");
        assert!(recs[1].services.is_empty());
        assert_eq!(recs[1].websites, vec!["coinbase.com", "coinbase.ie"]);
    }

    #[test]
    fn pipeline_headers() {
        let csv = "pk,competent_authority,home_member_state,lei_name,website,service_codes\n\
                   DE|bafin|x,BaFin,Germany,X GmbH,x.de,custody | transfer\n";
        let recs = normalize_casps(&build_table(csv, false), SchemaVariant::Pipeline);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].name, "X GmbH");
        assert_eq!(recs[0].authority, "BaFin");
        assert_eq!(recs[0].member_state, "Germany");
        assert_eq!(recs[0].services, vec!["custody", "transfer"]);

        // spreadsheet headers are not consulted for pipeline rows
        let none = normalize_casps(&build_table(csv, false), SchemaVariant::Spreadsheet);
        assert!(none.is_empty());
    }
}
