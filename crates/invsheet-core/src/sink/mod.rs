//! Spreadsheet sinks that receive one row per extracted invoice.
//!
//! Two independent appenders sit behind [`RecordSink`]: the remote Google
//! Sheets tab and the local workbook. A [`SinkSet`] drives both for every
//! row according to the configured [`Consistency`] policy.

mod auth;
mod google;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod workbook;

pub use auth::{AccessToken, ServiceAccountKey, access_token};
pub use google::{GoogleSheetSink, SheetsClient};
pub use workbook::{WorkbookSink, active_sheet_index};

use async_trait::async_trait;
use tracing::warn;

use crate::error::SinkError;
use crate::models::config::Consistency;

/// Something rows can be appended to.
#[async_trait]
pub trait RecordSink: Send {
    /// Sink name used in outcomes and logs.
    fn name(&self) -> &str;

    /// Append one row of cell values.
    async fn append(&mut self, row: &[String]) -> Result<(), SinkError>;

    /// Persist anything still buffered.
    async fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Result of appending one row to every sink in a set.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Sinks that accepted the row.
    pub written: Vec<String>,
    /// Sinks that rejected the row, with the reason.
    pub failures: Vec<(String, SinkError)>,
}

impl WriteReport {
    /// True when no sink failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures rendered as one line.
    pub fn failure_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let message = self
            .failures
            .iter()
            .map(|(sink, e)| format!("{}: {}", sink, e))
            .collect::<Vec<_>>()
            .join("; ");
        if !self.written.is_empty() {
            return Some(format!("partial write ({}), {}", self.written.join(", "), message));
        }
        Some(message)
    }
}

/// The remote and local sinks driven together.
pub struct SinkSet {
    remote: Option<Box<dyn RecordSink>>,
    local: Option<Box<dyn RecordSink>>,
    consistency: Consistency,
}

impl SinkSet {
    /// Create an empty set.
    pub fn new(consistency: Consistency) -> Self {
        Self {
            remote: None,
            local: None,
            consistency,
        }
    }

    /// Set the remote sink.
    pub fn with_remote(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.remote = Some(sink);
        self
    }

    /// Set the local sink.
    pub fn with_local(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.local = Some(sink);
        self
    }

    /// Names of the configured sinks, remote first.
    pub fn names(&self) -> Vec<String> {
        self.remote
            .iter()
            .chain(self.local.iter())
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Append a row to every sink.
    ///
    /// With [`Consistency::AllOrNothing`] the local sink only sees the row
    /// once the remote append succeeded.
    pub async fn append(&mut self, row: &[String]) -> WriteReport {
        let mut report = WriteReport::default();

        if let Some(remote) = self.remote.as_mut() {
            match remote.append(row).await {
                Ok(()) => report.written.push(remote.name().to_string()),
                Err(e) => {
                    warn!("{} rejected row: {}", remote.name(), e);
                    report.failures.push((remote.name().to_string(), e));
                    if self.consistency == Consistency::AllOrNothing {
                        return report;
                    }
                }
            }
        }

        if let Some(local) = self.local.as_mut() {
            match local.append(row).await {
                Ok(()) => report.written.push(local.name().to_string()),
                Err(e) => {
                    warn!("{} rejected row: {}", local.name(), e);
                    report.failures.push((local.name().to_string(), e));
                }
            }
        }

        report
    }

    /// Finish every sink, returning the first error after trying them all.
    pub async fn finish(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.remote.iter_mut().chain(self.local.iter_mut()) {
            if let Err(e) = sink.finish().await {
                warn!("Failed to finish {}: {}", sink.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
