//! Streaming Ingestion
//!
//! Samples arriving on a device stream take one of two paths: critical
//! samples are persisted and evaluated on the spot, everything else is
//! appended to the ingest hub and evaluated when its batch flushes.
//!
//! The hub only writes batches to storage. Evaluation and dispatch of a
//! written batch run on a separate task, and the critical path never waits
//! on the hub, so a slow batch cannot delay an emergency.

use crate::{Pipeline, PipelineError};
use async_trait::async_trait;
use ingest_buffer::{
    BatchSink, BufferConfig, ConnectionState, DeviceInfo, FlushReport, IngestError, IngestHandle,
    IngestHub,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use vitals_types::Reading;

/// What happened to one streamed sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Evaluated immediately
    Critical { alerts_generated: usize },
    /// Queued for the next flush
    Buffered,
    /// No canonical value; discarded
    Dropped,
}

/// Hub sink: persists a batch, then queues it for evaluation
struct StoringSink {
    pipeline: Arc<Pipeline>,
    evaluations: mpsc::UnboundedSender<Vec<Reading>>,
}

#[async_trait]
impl BatchSink for StoringSink {
    async fn write_batch(&self, readings: Vec<Reading>) -> Result<(), IngestError> {
        self.pipeline
            .storage()
            .append_readings_batch(&readings)
            .await
            .map_err(|e| IngestError::BatchWrite(e.to_string()))?;

        if self.evaluations.send(readings).is_err() {
            error!("Batch evaluator stopped; stored readings left unprocessed");
        }
        Ok(())
    }
}

/// Evaluate written batches in flush order until the sink is dropped
async fn evaluate_batches(pipeline: Arc<Pipeline>, mut batches: mpsc::UnboundedReceiver<Vec<Reading>>) {
    while let Some(batch) = batches.recv().await {
        pipeline.evaluate_batch(&batch).await;
    }
    debug!("Batch evaluator stopped");
}

/// Streaming front door: device sessions plus two-speed ingestion
#[derive(Clone)]
pub struct StreamGateway {
    pipeline: Arc<Pipeline>,
    hub: IngestHandle,
}

impl StreamGateway {
    /// Spawn an ingest hub flushing into `pipeline`, plus the task that
    /// evaluates flushed batches.
    ///
    /// The returned task finishes once the hub has stopped and every batch
    /// it wrote has been evaluated.
    pub fn spawn(pipeline: Arc<Pipeline>, config: BufferConfig) -> (Self, JoinHandle<()>) {
        let (evaluations, batches) = mpsc::unbounded_channel();
        let evaluator = tokio::spawn(evaluate_batches(pipeline.clone(), batches));
        let sink = Arc::new(StoringSink {
            pipeline: pipeline.clone(),
            evaluations,
        });
        let (hub, hub_task) = IngestHub::spawn(sink, config);

        let task = tokio::spawn(async move {
            if let Err(e) = hub_task.await {
                error!("Ingest hub task failed: {}", e);
            }
            if let Err(e) = evaluator.await {
                error!("Batch evaluator task failed: {}", e);
            }
        });
        (Self { pipeline, hub }, task)
    }

    pub fn hub(&self) -> &IngestHandle {
        &self.hub
    }

    pub async fn register_device(
        &self,
        user_id: &str,
        device: DeviceInfo,
    ) -> Result<ConnectionState, PipelineError> {
        Ok(self.hub.register_device(user_id, device).await?)
    }

    pub async fn touch_activity(&self, device_id: &str) -> Result<(), PipelineError> {
        Ok(self.hub.touch_activity(device_id).await?)
    }

    pub async fn disconnect(&self, device_id: &str) -> Result<Option<ConnectionState>, PipelineError> {
        Ok(self.hub.disconnect(device_id).await?)
    }

    /// Best-effort session touch that never waits on the hub
    fn note_activity(&self, device_id: &str) {
        if let Err(e) = self.hub.try_touch_activity(device_id) {
            debug!("Activity of {} not recorded: {}", device_id, e);
        }
    }

    /// Route one streamed sample.
    ///
    /// Invalid samples are acknowledged as [`StreamOutcome::Dropped`] rather
    /// than failing the stream. Critical samples are handled even after the
    /// hub has stopped.
    pub async fn ingest_sample(
        &self,
        user_id: &str,
        device_id: &str,
        device_type: &str,
        data_type: &str,
        raw: &Value,
    ) -> Result<StreamOutcome, PipelineError> {
        let reading = match self
            .pipeline
            .prepare(user_id, device_id, device_type, data_type, raw)
        {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Dropping streamed {} sample from {}: {}", data_type, device_id, e);
                metrics::counter!("vitals_readings_dropped_total", "path" => "stream").increment(1);
                self.note_activity(device_id);
                return Ok(StreamOutcome::Dropped);
            }
        };

        if self.pipeline.is_critical(&reading) {
            debug!("Critical {} sample from {}", data_type, device_id);
            metrics::counter!("vitals_readings_ingested_total", "path" => "critical").increment(1);
            let alerts_generated = self.pipeline.process_reading(reading).await?;
            self.note_activity(device_id);
            return Ok(StreamOutcome::Critical { alerts_generated });
        }

        metrics::counter!("vitals_readings_ingested_total", "path" => "buffered").increment(1);
        self.hub.append(reading).await?;
        Ok(StreamOutcome::Buffered)
    }

    /// Flush remaining samples and stop the hub
    pub async fn shutdown(&self) -> Result<FlushReport, PipelineError> {
        Ok(self.hub.shutdown().await?)
    }
}
