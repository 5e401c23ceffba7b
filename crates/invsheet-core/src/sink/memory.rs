use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::RecordSink;
use crate::error::SinkError;

pub(crate) type SharedRows = Arc<Mutex<Vec<Vec<String>>>>;

/// Sink collecting rows in memory, optionally rejecting every row.
pub(crate) struct MemorySink {
    name: String,
    rows: SharedRows,
    finished: Arc<AtomicBool>,
    fail: bool,
}

impl MemorySink {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Arc::default(),
            finished: Arc::default(),
            fail: false,
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub(crate) fn rows(&self) -> SharedRows {
        Arc::clone(&self.rows)
    }

    pub(crate) fn finished(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&mut self, row: &[String]) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Http("connection refused".to_string()));
        }
        self.rows
            .lock()
            .map_err(|e| SinkError::Workbook(e.to_string()))?
            .push(row.to_vec());
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}
