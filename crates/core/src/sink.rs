use std::io::Write;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};

use crate::datum::Datum;

/// Receives every successfully decoded record.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write_record(&self, message_id: &str, record: &Datum) -> Result<()>;
}

/// Prints each record as `Message Id: <id>` followed by `Data: <json>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl RecordSink for StdoutSink {
    async fn write_record(&self, message_id: &str, record: &Datum) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "Message Id: {message_id}")
            .and_then(|_| writeln!(out, "Data: {record}"))
            .map_err(|e| AvrosubError::Transport(format!("failed to write record: {e}")))
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(String, Datum)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, Datum)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn write_record(&self, message_id: &str, record: &Datum) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message_id.to_string(), record.clone()));
        Ok(())
    }
}
