//! Local `.xlsx` sink appending rows to the workbook's active sheet.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calamine::{DataType, Reader, open_workbook_auto};
use edit_xlsx::Write;
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use tracing::{debug, info};

use super::RecordSink;
use crate::error::SinkError;
use crate::models::config::PersistMode;

/// Column index to letter (0 → A, 25 → Z, 26 → AA).
fn column_letter(index: usize) -> String {
    let mut n = index;
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Drop characters that are not allowed in sheet XML.
fn clean_cell(value: &str) -> String {
    value
        .chars()
        .filter(|&c| match c {
            '\t' | '\n' | '\r' => true,
            '\u{0}'..='\u{1f}' | '\u{7f}' | '\u{fffe}' | '\u{ffff}' => false,
            _ => true,
        })
        .collect()
}

/// Index of the active sheet recorded in `xl/workbook.xml`, 0 when unset.
pub fn active_sheet_index(path: &Path) -> Result<usize, SinkError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| SinkError::Workbook(format!("not an xlsx file: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name("xl/workbook.xml")
        .map_err(|e| SinkError::Workbook(format!("missing workbook.xml: {}", e)))?
        .read_to_string(&mut xml)?;

    let mut reader = XmlReader::from_str(&xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"workbookView" =>
            {
                let Ok(Some(attr)) = e.try_get_attribute("activeTab") else {
                    return Ok(0);
                };
                let value = attr
                    .unescape_value()
                    .map_err(|e| SinkError::Workbook(e.to_string()))?;
                return Ok(value.trim().parse().unwrap_or(0));
            }
            Ok(Event::Eof) => return Ok(0),
            Err(e) => return Err(SinkError::Workbook(format!("invalid workbook.xml: {}", e))),
            _ => {}
        }
    }
}

/// Sink appending rows after the last non-empty row of the active sheet.
///
/// The workbook is copied to the output path when opened. Rows are buffered
/// and written on [`RecordSink::finish`], or after every row with
/// [`PersistMode::PerRow`].
pub struct WorkbookSink {
    path: PathBuf,
    sheet: String,
    next_row: u32,
    pending: Vec<Vec<String>>,
    persist: PersistMode,
    rows_written: usize,
}

impl WorkbookSink {
    /// Open `source`, select its active sheet and stage the output file.
    pub fn open(source: &Path, output: &Path, persist: PersistMode) -> Result<Self, SinkError> {
        let mut workbook = open_workbook_auto(source)
            .map_err(|e| SinkError::Workbook(format!("cannot open {}: {}", source.display(), e)))?;
        let names = workbook.sheet_names().to_vec();
        if names.is_empty() {
            return Err(SinkError::Workbook(format!("{} has no sheets", source.display())));
        }

        let active = active_sheet_index(source)?;
        let sheet = names.get(active).unwrap_or(&names[0]).clone();

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| SinkError::Workbook(format!("cannot read sheet '{}': {}", sheet, e)))?;
        let start_row = range.start().map(|(row, _)| row).unwrap_or(0);
        let last_row = range
            .rows()
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|c| !c.is_empty()))
            .map(|(i, _)| start_row + i as u32 + 1)
            .last()
            .unwrap_or(0);

        if source != output {
            std::fs::copy(source, output)?;
        }

        info!(
            "Workbook sheet '{}' has {} used rows, appending from row {}",
            sheet,
            last_row,
            last_row + 1
        );
        Ok(Self {
            path: output.to_path_buf(),
            sheet,
            next_row: last_row + 1,
            pending: Vec::new(),
            persist,
            rows_written: 0,
        })
    }

    /// Name of the sheet rows are appended to.
    pub fn sheet_name(&self) -> &str {
        &self.sheet
    }

    /// Path the workbook is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows saved to disk so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Write buffered rows and save the workbook.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut workbook = edit_xlsx::Workbook::from_path(&self.path)
            .map_err(|e| SinkError::Workbook(format!("cannot open {}: {}", self.path.display(), e)))?;
        let worksheet = workbook
            .get_worksheet_mut_by_name(&self.sheet)
            .map_err(|e| SinkError::Workbook(format!("sheet '{}' not found: {}", self.sheet, e)))?;

        let mut row_number = self.next_row;
        for row in &self.pending {
            for (col, value) in row.iter().enumerate() {
                let cell_ref = format!("{}{}", column_letter(col), row_number);
                worksheet
                    .write_string(&cell_ref, clean_cell(value))
                    .map_err(|e| SinkError::Workbook(e.to_string()))?;
            }
            row_number += 1;
        }

        workbook
            .save_as(&self.path)
            .map_err(|e| SinkError::Workbook(format!("cannot write {}: {}", self.path.display(), e)))?;

        debug!("Saved {} rows to {}", self.pending.len(), self.path.display());
        self.rows_written += self.pending.len();
        self.next_row = row_number;
        self.pending.clear();
        Ok(())
    }
}

#[async_trait]
impl RecordSink for WorkbookSink {
    fn name(&self) -> &str {
        "workbook"
    }

    async fn append(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.pending.push(row.to_vec());
        if self.persist == PersistMode::PerRow {
            if let Err(e) = self.flush() {
                // a rejected row must not reach the file on a later save
                self.pending.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use calamine::Data;
    use pretty_assertions::assert_eq;

    /// Workbook with a "Summary" sheet and an "Invoices" sheet holding a
    /// header row and one data row. `active_second` makes "Invoices" active.
    pub(crate) fn build_workbook(path: &Path, active_second: bool) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let summary = workbook.add_worksheet();
        summary.set_name("Summary").unwrap();
        summary.write_string(0, 0, "overview").unwrap();

        let invoices = workbook.add_worksheet();
        invoices.set_name("Invoices").unwrap();
        invoices.write_string(0, 0, "PO Number").unwrap();
        invoices.write_string(0, 1, "Invoice Number").unwrap();
        invoices.write_string(1, 0, "PO-1").unwrap();
        invoices.write_string(1, 1, "INV-1").unwrap();
        if active_second {
            invoices.set_active(true);
        }
        workbook.save(path).unwrap();
    }

    pub(crate) fn read_rows(path: &Path, sheet: &str) -> Vec<Vec<String>> {
        let mut workbook = open_workbook_auto(path).unwrap();
        let range = workbook.worksheet_range(sheet).unwrap();
        range
            .rows()
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| match c {
                        Data::String(s) => s.clone(),
                        Data::Empty => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(16), "Q");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(701), "ZZ");
    }

    #[test]
    fn test_clean_cell() {
        assert_eq!(clean_cell("Acme\u{1}Corp\n"), "AcmeCorp\n");
        assert_eq!(clean_cell("Health&Glow"), "Health&Glow");
    }

    #[test]
    fn test_active_sheet_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");

        build_workbook(&path, true);
        assert_eq!(active_sheet_index(&path).unwrap(), 1);

        build_workbook(&path, false);
        assert_eq!(active_sheet_index(&path).unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_non_xlsx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(WorkbookSink::open(&path, &path, PersistMode::EndOfBatch).is_err());
    }

    #[tokio::test]
    async fn test_appends_to_active_sheet_at_end_of_batch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.xlsx");
        let output = dir.path().join("updated.xlsx");
        build_workbook(&source, true);

        let mut sink = WorkbookSink::open(&source, &output, PersistMode::EndOfBatch).unwrap();
        assert_eq!(sink.sheet_name(), "Invoices");

        sink.append(&row(&["PO-2", "INV-2"])).await.unwrap();
        sink.append(&row(&["NA", "INV-3"])).await.unwrap();
        assert_eq!(sink.rows_written(), 0);
        sink.finish().await.unwrap();
        assert_eq!(sink.rows_written(), 2);

        assert_eq!(
            read_rows(&output, "Invoices"),
            vec![
                row(&["PO Number", "Invoice Number"]),
                row(&["PO-1", "INV-1"]),
                row(&["PO-2", "INV-2"]),
                row(&["NA", "INV-3"]),
            ]
        );
        assert_eq!(read_rows(&output, "Summary"), vec![row(&["overview"])]);
        assert_eq!(read_rows(&source, "Invoices").len(), 2);
    }

    #[tokio::test]
    async fn test_per_row_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        build_workbook(&path, false);

        let mut sink = WorkbookSink::open(&path, &path, PersistMode::PerRow).unwrap();
        assert_eq!(sink.sheet_name(), "Summary");

        sink.append(&row(&["first"])).await.unwrap();
        assert_eq!(read_rows(&path, "Summary").len(), 2);
        sink.append(&row(&["second"])).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(
            read_rows(&path, "Summary"),
            vec![row(&["overview"]), row(&["first"]), row(&["second"])]
        );
    }

    #[tokio::test]
    async fn test_per_row_failed_save_drops_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        build_workbook(&path, false);

        let mut sink = WorkbookSink::open(&path, &path, PersistMode::PerRow).unwrap();
        let original = std::fs::read(&path).unwrap();
        std::fs::write(&path, b"not a workbook").unwrap();
        assert!(sink.append(&row(&["rejected"])).await.is_err());
        assert_eq!(sink.rows_written(), 0);

        std::fs::write(&path, &original).unwrap();
        sink.append(&row(&["accepted"])).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(
            read_rows(&path, "Summary"),
            vec![row(&["overview"]), row(&["accepted"])]
        );
    }

    #[tokio::test]
    async fn test_nothing_appended_copies_through() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.xlsx");
        let output = dir.path().join("copy.xlsx");
        build_workbook(&source, true);

        let mut sink = WorkbookSink::open(&source, &output, PersistMode::EndOfBatch).unwrap();
        sink.finish().await.unwrap();
        assert_eq!(std::fs::read(&source).unwrap(), std::fs::read(&output).unwrap());
    }
}
