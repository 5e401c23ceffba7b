//! The fixed 17-field record produced for every invoice.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Sentinel stored in every field that the model reply did not fill.
pub const NOT_AVAILABLE: &str = "NA";

/// Number of fields in a record.
pub const FIELD_COUNT: usize = 17;

/// Field labels in row order. The labels double as the substrings matched
/// against model reply lines.
pub const FIELD_LABELS: [&str; FIELD_COUNT] = [
    "PO Number",
    "Invoice Number",
    "Invoice Amount",
    "Invoice Date",
    "CGST Amount",
    "SGST Amount",
    "IGST Amount",
    "Total Tax Amount",
    "Taxable Amount",
    "TCS Amount",
    "IRN Number",
    "Receiver GSTIN",
    "Receiver Name",
    "Vendor GSTIN",
    "Vendor Name",
    "Remarks",
    "Vendor Code",
];

/// Extracted invoice fields, always holding exactly [`FIELD_LABELS`] in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    values: [String; FIELD_COUNT],
}

impl ExtractedRecord {
    /// Create a record with every field set to [`NOT_AVAILABLE`].
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|_| NOT_AVAILABLE.to_string()),
        }
    }

    /// Position of a label in row order.
    pub fn index_of(label: &str) -> Option<usize> {
        FIELD_LABELS.iter().position(|l| *l == label)
    }

    /// Get a field value by label.
    pub fn get(&self, label: &str) -> Option<&str> {
        Self::index_of(label).map(|i| self.values[i].as_str())
    }

    /// Overwrite a field. Returns `false` when the label is not one of the 17.
    pub fn set(&mut self, label: &str, value: impl Into<String>) -> bool {
        match Self::index_of(label) {
            Some(i) => {
                self.values[i] = value.into();
                true
            }
            None => false,
        }
    }

    /// Iterate `(label, value)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        FIELD_LABELS
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }

    /// Values in row order, ready to append to a sheet.
    pub fn to_row(&self) -> Vec<String> {
        self.values.to_vec()
    }

    /// Number of fields holding something other than the sentinel.
    pub fn found_count(&self) -> usize {
        self.values.iter().filter(|v| *v != NOT_AVAILABLE).count()
    }

    /// Human-readable echo, one `label: value` line per field.
    pub fn summary(&self) -> String {
        self.iter()
            .map(|(label, value)| format!("{:20}: {}", label, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ExtractedRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for ExtractedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for (label, value) in self.iter() {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}
