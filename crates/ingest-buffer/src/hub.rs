//! Ingest Hub Actor
//!
//! A single task owns every per-user buffer and device session. Callers talk
//! to it through [`IngestHandle`], so appends for one user are applied in the
//! order they were submitted and a flush always sees a consistent snapshot.

use crate::buffer::UserBuffers;
use crate::session::{ConnectionState, DeviceInfo, SessionTable};
use crate::{BatchSink, BufferConfig, IngestError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vitals_types::Reading;

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Readings handed to the sink
    pub readings: usize,
    /// Users those readings belonged to
    pub users: usize,
    /// Whether the sink accepted them
    pub written: bool,
}

/// Hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub buffered: usize,
    pub users: usize,
    pub connections: usize,
    pub flushes: u64,
    pub failed_flushes: u64,
}

enum Command {
    Append(Reading),
    Register {
        user_id: String,
        device: DeviceInfo,
        reply: oneshot::Sender<ConnectionState>,
    },
    Touch(String),
    Disconnect {
        device_id: String,
        reply: oneshot::Sender<Option<ConnectionState>>,
    },
    Connections(oneshot::Sender<Vec<ConnectionState>>),
    Stats(oneshot::Sender<HubStats>),
    Flush(oneshot::Sender<FlushReport>),
    Shutdown(oneshot::Sender<FlushReport>),
}

/// Cloneable handle to a running hub
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Command>,
}

impl IngestHandle {
    async fn send(&self, command: Command) -> Result<(), IngestError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| IngestError::HubStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| IngestError::HubStopped)
    }

    /// Queue a reading for the next flush
    pub async fn append(&self, reading: Reading) -> Result<(), IngestError> {
        self.send(Command::Append(reading)).await
    }

    /// Open (or return the existing) session for a device
    pub async fn register_device(
        &self,
        user_id: &str,
        device: DeviceInfo,
    ) -> Result<ConnectionState, IngestError> {
        let user_id = user_id.to_string();
        self.request(|reply| Command::Register {
            user_id,
            device,
            reply,
        })
        .await
    }

    /// Mark a device as active
    pub async fn touch_activity(&self, device_id: &str) -> Result<(), IngestError> {
        self.send(Command::Touch(device_id.to_string())).await
    }

    /// Mark a device as active without waiting for queue space
    pub fn try_touch_activity(&self, device_id: &str) -> Result<(), IngestError> {
        self.tx
            .try_send(Command::Touch(device_id.to_string()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IngestError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IngestError::HubStopped,
            })
    }

    /// Close a device session; unknown devices are a no-op
    pub async fn disconnect(&self, device_id: &str) -> Result<Option<ConnectionState>, IngestError> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::Disconnect { device_id, reply })
            .await
    }

    pub async fn connections(&self) -> Result<Vec<ConnectionState>, IngestError> {
        self.request(Command::Connections).await
    }

    pub async fn stats(&self) -> Result<HubStats, IngestError> {
        self.request(Command::Stats).await
    }

    /// Flush immediately instead of waiting for the next tick
    pub async fn flush(&self) -> Result<FlushReport, IngestError> {
        self.request(Command::Flush).await
    }

    /// Drain buffered readings and stop the hub
    pub async fn shutdown(&self) -> Result<FlushReport, IngestError> {
        self.request(Command::Shutdown).await
    }
}

/// Buffer owner; run it with [`IngestHub::spawn`]
pub struct IngestHub {
    rx: mpsc::Receiver<Command>,
    buffers: UserBuffers,
    sessions: SessionTable,
    sink: Arc<dyn BatchSink>,
    config: BufferConfig,
    stats: HubStats,
}

impl IngestHub {
    /// Create a hub and the handle that feeds it
    pub fn new(sink: Arc<dyn BatchSink>, config: BufferConfig) -> (IngestHandle, Self) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        info!(
            "Creating ingest hub: flush every {}s, idle timeout {}s",
            config.flush_interval_secs, config.idle_timeout_secs
        );
        let hub = Self {
            rx,
            buffers: UserBuffers::new(),
            sessions: SessionTable::new(),
            sink,
            config,
            stats: HubStats::default(),
        };
        (IngestHandle { tx }, hub)
    }

    /// Spawn the hub on the current runtime
    pub fn spawn(sink: Arc<dyn BatchSink>, config: BufferConfig) -> (IngestHandle, JoinHandle<()>) {
        let (handle, hub) = Self::new(sink, config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the command loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let flush_every = Duration::from_secs(self.config.flush_interval_secs.max(1));
        let sweep_every = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);

        let mut flush_tick = interval_at(Instant::now() + flush_every, flush_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = interval_at(Instant::now() + sweep_every, sweep_every);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Ingest hub started");
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let report = self.drain().await;
                        let _ = reply.send(report);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("All ingest handles dropped");
                        self.drain().await;
                        break;
                    }
                },
                _ = flush_tick.tick() => {
                    self.flush().await;
                }
                _ = sweep_tick.tick() => {
                    let dropped = self.sessions.sweep_idle(idle_timeout);
                    if !dropped.is_empty() {
                        metrics::gauge!("vitals_active_connections").set(self.sessions.len() as f64);
                    }
                }
            }
        }
        info!("Ingest hub stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Append(reading) => {
                self.sessions.touch(&reading.device_id);
                self.buffers.push(reading);
            }
            Command::Register {
                user_id,
                device,
                reply,
            } => {
                let state = self.sessions.register(&user_id, device);
                metrics::gauge!("vitals_active_connections").set(self.sessions.len() as f64);
                let _ = reply.send(state);
            }
            Command::Touch(device_id) => {
                if !self.sessions.touch(&device_id) {
                    debug!("Activity from unknown device {}", device_id);
                }
            }
            Command::Disconnect { device_id, reply } => {
                let state = self.sessions.disconnect(&device_id);
                metrics::gauge!("vitals_active_connections").set(self.sessions.len() as f64);
                let _ = reply.send(state);
            }
            Command::Connections(reply) => {
                let _ = reply.send(self.sessions.states());
            }
            Command::Stats(reply) => {
                let stats = HubStats {
                    buffered: self.buffers.len(),
                    users: self.buffers.user_count(),
                    connections: self.sessions.len(),
                    ..self.stats
                };
                let _ = reply.send(stats);
            }
            Command::Flush(reply) => {
                let report = self.flush().await;
                let _ = reply.send(report);
            }
            // Handled by the run loop
            Command::Shutdown(_) => {}
        }
    }

    /// Swap out every buffer and hand the lot to the sink.
    ///
    /// A rejected batch goes back in front of anything buffered since.
    async fn flush(&mut self) -> FlushReport {
        if self.buffers.is_empty() {
            return FlushReport {
                written: true,
                ..FlushReport::default()
            };
        }

        let taken = self.buffers.take_all();
        let users = taken.len();
        let batch: Vec<Reading> = taken.values().flatten().cloned().collect();
        let readings = batch.len();

        self.stats.flushes += 1;
        match self.sink.write_batch(batch).await {
            Ok(()) => {
                debug!("Flushed {} readings for {} users", readings, users);
                FlushReport {
                    readings,
                    users,
                    written: true,
                }
            }
            Err(e) => {
                warn!("Flush of {} readings failed, retrying next tick: {}", readings, e);
                self.buffers.restore(taken);
                self.stats.failed_flushes += 1;
                metrics::counter!("vitals_flush_failures_total").increment(1);
                FlushReport {
                    readings,
                    users,
                    written: false,
                }
            }
        }
    }

    /// Final flush on shutdown, retried a bounded number of times
    async fn drain(&mut self) -> FlushReport {
        let attempts = self.config.drain_attempts.max(1);
        let mut report = FlushReport::default();
        for attempt in 1..=attempts {
            report = self.flush().await;
            if report.written {
                info!("Drained {} buffered readings", report.readings);
                return report;
            }
            warn!("Drain attempt {}/{} failed", attempt, attempts);
        }
        error!(
            "Dropping {} buffered readings after {} failed drain attempts",
            self.buffers.len(),
            attempts
        );
        report
    }
}
