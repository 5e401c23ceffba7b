//! The fixed instruction prompt.

use crate::models::config::ReplyFormat;
use crate::models::record::{FIELD_LABELS, NOT_AVAILABLE};

const PREAMBLE: &str = "You are reading the text of an invoice. \
Extract the following fields and give a structured summary of the invoice:";

/// Instruction text for the given reply format.
pub fn instruction(format: ReplyFormat) -> String {
    let mut text = String::from(PREAMBLE);
    text.push('\n');
    for label in FIELD_LABELS {
        text.push_str("- ");
        text.push_str(label);
        text.push('\n');
    }

    match format {
        ReplyFormat::Lines => {
            text.push_str(
                "Reply with exactly one line per field in the form `Field Name: value`, \
                 using the field names above verbatim and in the same order. ",
            );
        }
        ReplyFormat::Json => {
            text.push_str(
                "Reply with a single JSON object whose keys are the field names above \
                 verbatim and whose values are strings. ",
            );
        }
    }
    text.push_str(&format!(
        "If a field is not present in the invoice, use {} as its value. \
         Do not add any other commentary.",
        NOT_AVAILABLE
    ));
    text
}

/// Instruction followed by a blank line and the document text, verbatim.
pub fn build_prompt(format: ReplyFormat, document_text: &str) -> String {
    format!("{}\n\n{}", instruction(format), document_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_lists_every_field() {
        let text = instruction(ReplyFormat::Lines);
        for label in FIELD_LABELS {
            assert!(text.contains(&format!("- {}\n", label)), "missing {}", label);
        }
        assert!(text.contains("use NA as its value"));
    }

    #[test]
    fn test_prompt_embeds_text_verbatim() {
        let document = "Vendor Name: Acme Corp\nInvoice Amount: 1500";
        let prompt = build_prompt(ReplyFormat::Lines, document);
        assert!(prompt.starts_with(PREAMBLE));
        assert!(prompt.ends_with(&format!("\n\n{}", document)));
    }

    #[test]
    fn test_json_instruction() {
        assert!(instruction(ReplyFormat::Json).contains("single JSON object"));
        assert!(!instruction(ReplyFormat::Lines).contains("JSON"));
    }
}
