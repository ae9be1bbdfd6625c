//! Output stage: buffers reports and flushes them to one sink on a timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::pipeline::worker::{StageState, Worker};
use crate::pipeline::{PipelineError, clamp_interval};
use crate::plugin::{PluginKind, Sink};
use crate::report::Report;

/// Initial buffer capacity.
const BUFFER_CAPACITY: usize = 256;

type Inbound = mpsc::Receiver<Arc<Report>>;

/// Owns one [`Sink`], its inbound channel and the task flushing it.
pub struct OutputStage {
    name: String,
    flush_interval: Duration,
    tx: mpsc::Sender<Arc<Report>>,
    state: StageState<(Box<dyn Sink>, Inbound), Box<dyn Sink>>,
}

impl std::fmt::Debug for OutputStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStage")
            .field("name", &self.name)
            .field("flush_interval", &self.flush_interval)
            .field("running", &self.state.is_running())
            .finish_non_exhaustive()
    }
}

impl OutputStage {
    /// Attach a sink flushed every `flush_interval`, with an inbound channel
    /// holding up to `capacity` reports.
    ///
    /// Flush intervals below [`MIN_INTERVAL`](crate::pipeline::MIN_INTERVAL)
    /// are raised to it.
    pub fn new(
        name: impl Into<String>,
        sink: Box<dyn Sink>,
        flush_interval: Duration,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: name.into(),
            flush_interval: clamp_interval(flush_interval),
            tx,
            state: StageState::Idle((sink, rx)),
        }
    }

    /// Stage name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cadence of periodic flushes.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Whether the flushing task is running.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Sender feeding this stage's buffer.
    ///
    /// Sends fail once the stage has stopped.
    pub fn sender(&self) -> mpsc::Sender<Arc<Report>> {
        self.tx.clone()
    }

    /// Open the sink and start the buffering task.
    ///
    /// # Errors
    /// Returns `PipelineError::Open` if the sink fails to open.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        let (mut sink, inbound) = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Idle(parts) => parts,
            StageState::Running(worker) => {
                self.state = StageState::Running(worker);
                return Err(PipelineError::AlreadyStarted(self.name.clone()));
            }
            StageState::Stopped => return Err(PipelineError::Stopped(self.name.clone())),
        };

        if let Err(e) = sink.open().await {
            tracing::error!(stage = %self.name, error = %e, "Failed to open output");
            self.state = StageState::Idle((sink, inbound));
            return Err(PipelineError::Open {
                kind: PluginKind::Sink,
                stage: self.name.clone(),
                source: e,
            });
        }

        let flusher = Flusher::new(self.name.clone(), sink, inbound);
        let interval = self.flush_interval;
        self.state = StageState::Running(Worker::spawn(|stop_rx| flusher.run(interval, stop_rx)));
        tracing::debug!(stage = %self.name, flush_interval = ?interval, "Output started");
        Ok(())
    }

    /// Stop the task after a final flush, then close the sink.
    ///
    /// Reports already queued on the inbound channel are part of the final
    /// flush. The inbound channel is closed when the task exits. Close errors
    /// are logged, not returned.
    pub async fn stop(&mut self) {
        let worker = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Running(worker) => worker,
            other => {
                self.state = other;
                return;
            }
        };

        match worker.stop().await {
            Ok(mut sink) => {
                if let Err(e) = sink.close().await {
                    tracing::error!(stage = %self.name, error = %e, "Failed to close output");
                }
            }
            Err(e) => {
                tracing::error!(stage = %self.name, error = %e, "Output task failed, sink not closed");
            }
        }
        tracing::debug!(stage = %self.name, "Output stopped");
    }
}

/// State moved into the flushing task.
struct Flusher {
    name: String,
    sink: Box<dyn Sink>,
    inbound: Inbound,
    buffer: Vec<Arc<Report>>,
}

impl Flusher {
    fn new(name: String, sink: Box<dyn Sink>, inbound: Inbound) -> Self {
        Self {
            name,
            sink,
            inbound,
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    async fn run(mut self, interval: Duration, mut stop_rx: oneshot::Receiver<()>) -> Box<dyn Sink> {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    while let Ok(report) = self.inbound.try_recv() {
                        self.buffer.push(report);
                    }
                    self.flush().await;
                    break;
                }
                _ = ticker.tick() => self.flush().await,
                Some(report) = self.inbound.recv() => self.buffer.push(report),
            }
        }
        self.sink
    }

    /// Deliver the buffer. The buffer is cleared whether or not delivery succeeds.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if let Err(e) = self.sink.handle(&self.buffer).await {
            tracing::error!(
                stage = %self.name,
                error = %e,
                reports = self.buffer.len(),
                "Failed to flush output"
            );
        } else {
            tracing::trace!(stage = %self.name, reports = self.buffer.len(), "Output flushed");
        }
        self.buffer.clear();
    }
}
