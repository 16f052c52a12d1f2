//! Streaming Ingest Buffer
//!
//! Non-critical streamed samples are held per user and written in batches on
//! a fixed interval. The same actor tracks live device sessions and
//! disconnects devices that go quiet.

mod buffer;
mod hub;
mod session;

pub use buffer::UserBuffers;
pub use hub::{FlushReport, HubStats, IngestHandle, IngestHub};
pub use session::{ConnectionState, DeviceInfo, SessionTable};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vitals_types::Reading;

/// Ingest errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingest hub is not running")]
    HubStopped,

    #[error("Ingest hub command queue is full")]
    QueueFull,

    #[error("Batch write failed: {0}")]
    BatchWrite(String),
}

/// Buffering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Seconds between batch flushes
    pub flush_interval_secs: u64,
    /// Seconds without activity before a device is disconnected
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps
    pub sweep_interval_secs: u64,
    /// Pending command capacity before senders wait
    pub command_capacity: usize,
    /// Flush attempts made on shutdown
    pub drain_attempts: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            command_capacity: 1024,
            drain_attempts: 3,
        }
    }
}

/// Destination for flushed batches
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Persist a batch; an error keeps the readings buffered for the next flush
    async fn write_batch(&self, readings: Vec<Reading>) -> Result<(), IngestError>;
}
