// src/html/dates.rs

use chrono::NaiveDate;

/// Parse `YYYY-MM-DD` (or `YYYY/MM/DD`) when the value leads with a 4-digit
/// year, otherwise `DD-MM-YYYY` / `DD/MM/YYYY`. A time suffix is ignored.
pub fn parse_register_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split(['T', ' ']).next()?;
    let parts: Vec<&str> = date_part.split(['-', '/']).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    let leads_with_year = a.len() == 4 && a.chars().all(|ch| ch.is_ascii_digit());
    let (y, m, d) = if leads_with_year { (a, b, c) } else { (c, b, a) };
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

/// Long display form, e.g. `5 March 2025`. No input means today; an
/// unparsable input is returned as given.
pub fn format_display_date(raw: Option<&str>, today: NaiveDate) -> String {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let date = match raw {
        None => today,
        Some(s) => match parse_register_date(s) {
            Some(d) => d,
            None => return s.to_string(),
        },
    };
    date.format("%-d %B %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn both_orders_are_understood() {
        assert_eq!(format_display_date(Some("2025-03-05"), today()), "5 March 2025");
        assert_eq!(format_display_date(Some("05-03-2025"), today()), "5 March 2025");
        assert_eq!(format_display_date(Some("28/02/2025"), today()), "28 February 2025");
        assert_eq!(
            format_display_date(Some("2025-05-21T10:00:00Z"), today()),
            "21 May 2025"
        );
    }

    #[test]
    fn missing_defaults_to_today_and_garbage_passes_through() {
        assert_eq!(format_display_date(None, today()), "17 October 2026");
        assert_eq!(format_display_date(Some("  "), today()), "17 October 2026");
        assert_eq!(format_display_date(Some("soon"), today()), "soon");
        assert_eq!(format_display_date(Some("2025-13-01"), today()), "2025-13-01");
    }
}
