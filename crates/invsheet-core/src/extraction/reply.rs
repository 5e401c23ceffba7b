//! Turning a model reply into an [`ExtractedRecord`].

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::config::ReplyFormat;
use crate::models::record::{ExtractedRecord, FIELD_LABELS};

/// Strip surrounding whitespace, then every `"` and `,`.
pub fn sanitize_value(raw: &str) -> String {
    raw.trim().replace(['"', ','], "")
}

/// Line boundaries, including lone `\r` and the Unicode separators.
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\u{b}', '\u{c}', '\u{1c}', '\u{1d}', '\u{1e}', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Parse a reply line by line.
///
/// A label matches when it occurs anywhere in a line, so one line can fill
/// several fields and `Remarks: Vendor Name mismatch` also sets `Vendor Name`.
/// The value is whatever follows the last `:` on the line (the whole line when
/// there is none). Later lines overwrite earlier ones.
pub fn parse_line_reply(reply: &str) -> ExtractedRecord {
    let mut record = ExtractedRecord::new();
    for line in reply.split(LINE_BREAKS) {
        for label in FIELD_LABELS {
            if !line.contains(label) {
                continue;
            }
            let raw = match line.rfind(':') {
                Some(pos) => &line[pos + 1..],
                None => line,
            };
            record.set(label, sanitize_value(raw));
        }
    }
    debug!("Line reply filled {} fields", record.found_count());
    record
}

/// Parse a reply holding one JSON object keyed by field label.
///
/// Returns `None` when the reply is not a JSON object.
pub fn parse_json_reply(reply: &str) -> Option<ExtractedRecord> {
    let body = strip_code_fence(reply);
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    let mut record = ExtractedRecord::new();
    for label in FIELD_LABELS {
        let value = match map.get(label) {
            Some(Value::String(s)) => sanitize_value(s),
            Some(Value::Null) | None => continue,
            Some(other) => sanitize_value(&other.to_string()),
        };
        record.set(label, value);
    }
    Some(record)
}

/// Parse a reply according to the configured format, collecting warnings.
pub fn parse_reply(reply: &str, format: ReplyFormat, warnings: &mut Vec<String>) -> ExtractedRecord {
    match format {
        ReplyFormat::Lines => parse_line_reply(reply),
        ReplyFormat::Json => parse_json_reply(reply).unwrap_or_else(|| {
            warn!("Reply is not a JSON object, falling back to line parsing");
            warnings.push("Reply was not a JSON object; parsed line by line".to_string());
            parse_line_reply(reply)
        }),
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string, e.g. ```json
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::NOT_AVAILABLE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_field() {
        let record = parse_line_reply("Invoice Number: INV-2024-001");
        assert_eq!(record.get("Invoice Number"), Some("INV-2024-001"));
        assert_eq!(record.found_count(), 1);
    }

    #[test]
    fn test_unmatched_fields_stay_na() {
        let record = parse_line_reply("Nothing useful here\nTotal: 12");
        assert!(record.iter().all(|(_, v)| v == NOT_AVAILABLE));
    }

    #[test]
    fn test_last_match_wins() {
        let record = parse_line_reply("Vendor Name: First Ltd\nVendor Name: Second Ltd");
        assert_eq!(record.get("Vendor Name"), Some("Second Ltd"));
    }

    #[test]
    fn test_lone_carriage_return_splits_lines() {
        let record = parse_line_reply("Vendor Name: Acme Corp\rInvoice Amount: 1500\r\nPO Number: PO-7");
        assert_eq!(record.get("Vendor Name"), Some("Acme Corp"));
        assert_eq!(record.get("Invoice Amount"), Some("1500"));
        assert_eq!(record.get("PO Number"), Some("PO-7"));
    }

    #[test]
    fn test_value_after_last_colon() {
        let record = parse_line_reply("**Invoice Date:** Date: 12/03/2024");
        assert_eq!(record.get("Invoice Date"), Some("12/03/2024"));
    }

    #[test]
    fn test_line_without_colon_uses_whole_line() {
        let record = parse_line_reply("  PO Number 4500012345  ");
        assert_eq!(record.get("PO Number"), Some("PO Number 4500012345"));
    }

    #[test]
    fn test_quotes_and_commas_removed() {
        let record = parse_line_reply(r#""Invoice Amount": "1,50,000.00","#);
        assert_eq!(record.get("Invoice Amount"), Some("150000.00"));
    }

    #[test]
    fn test_substring_false_positive_kept() {
        let record = parse_line_reply("Vendor Name: Acme Corp\nRemarks: Vendor Name mismatch");
        assert_eq!(record.get("Remarks"), Some("Vendor Name mismatch"));
        assert_eq!(record.get("Vendor Name"), Some("Vendor Name mismatch"));
    }

    #[test]
    fn test_acme_reply() {
        let record = parse_line_reply("Vendor Name: Acme Corp\nInvoice Amount: 1500");
        assert_eq!(record.get("Vendor Name"), Some("Acme Corp"));
        assert_eq!(record.get("Invoice Amount"), Some("1500"));
        assert_eq!(
            record.iter().filter(|(_, v)| *v == NOT_AVAILABLE).count(),
            15
        );
    }

    #[test]
    fn test_json_reply() {
        let reply = "```json\n{\"Invoice Number\": \"INV-7\", \"Invoice Amount\": 1500, \"Unknown\": \"x\", \"Remarks\": null}\n```";
        let record = parse_json_reply(reply).unwrap();
        assert_eq!(record.get("Invoice Number"), Some("INV-7"));
        assert_eq!(record.get("Invoice Amount"), Some("1500"));
        assert_eq!(record.get("Remarks"), Some(NOT_AVAILABLE));
        assert_eq!(record.found_count(), 2);
    }

    #[test]
    fn test_json_reply_falls_back_to_lines() {
        let mut warnings = Vec::new();
        let record = parse_reply("Vendor Name: Acme Corp", ReplyFormat::Json, &mut warnings);
        assert_eq!(record.get("Vendor Name"), Some("Acme Corp"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence(" {} "), "{}");
    }
}
