//! Data models for the pipeline.

pub mod config;
pub mod record;

use chrono::Month;

use crate::error::InvsheetError;

/// The month names offered to the operator, in calendar order.
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Parse a month name (full or abbreviated, any case).
pub fn parse_month(name: &str) -> Result<Month, InvsheetError> {
    name.trim()
        .parse::<Month>()
        .map_err(|_| InvsheetError::Config(format!("unknown month: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("March").unwrap(), Month::March);
        assert_eq!(parse_month(" october ").unwrap(), Month::October);
        assert_eq!(parse_month("dec").unwrap().name(), "December");
        assert!(parse_month("Smarch").is_err());
    }

    #[test]
    fn test_month_names_match_chrono() {
        for (i, name) in MONTH_NAMES.iter().enumerate() {
            let month = parse_month(name).unwrap();
            assert_eq!(month.number_from_month() as usize, i + 1);
            assert_eq!(month.name(), *name);
        }
    }
}
