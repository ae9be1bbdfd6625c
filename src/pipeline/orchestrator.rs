//! Pipeline assembly and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::pipeline::PipelineError;
use crate::pipeline::input::InputStage;
use crate::pipeline::output::OutputStage;
use crate::pipeline::worker::{StageState, Worker};
use crate::plugin::{Sink, Source};
use crate::report::Report;

/// Smallest accepted sampling/flush interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Interval used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Capacity of the report channel shared by all inputs.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of each output's inbound channel.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 1;

/// Name used for pipeline-level lifecycle errors.
const PIPELINE: &str = "pipeline";

/// Raise `interval` to [`MIN_INTERVAL`] if it is shorter.
pub fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(
            requested = ?interval,
            effective = ?MIN_INTERVAL,
            "Interval below minimum, clamping"
        );
        MIN_INTERVAL
    } else {
        interval
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    interval: Duration,
    tag_prefix: String,
    channel_capacity: usize,
    output_capacity: usize,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tag_prefix: String::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sampling and flush interval, floored at one second.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Prefix prepended to every record name.
    pub fn tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn build(self) -> Pipeline {
        let (report_tx, report_rx) = mpsc::channel(self.channel_capacity.max(1));
        Pipeline {
            interval: clamp_interval(self.interval),
            tag_prefix: self.tag_prefix,
            output_capacity: self.output_capacity.max(1),
            report_tx,
            inputs: Vec::new(),
            outputs: Vec::new(),
            state: StageState::Idle(report_rx),
        }
    }
}

/// Sources polled on a shared interval, fanned out to buffered sinks.
///
/// Every report produced by any source reaches every sink. Sources and sinks
/// are attached before [`run`](Pipeline::run); a pipeline runs at most once.
pub struct Pipeline {
    interval: Duration,
    tag_prefix: String,
    output_capacity: usize,
    report_tx: mpsc::Sender<Arc<Report>>,
    inputs: Vec<InputStage>,
    outputs: Vec<OutputStage>,
    state: StageState<mpsc::Receiver<Arc<Report>>, ()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("interval", &self.interval)
            .field("tag_prefix", &self.tag_prefix)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("running", &self.state.is_running())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Effective interval, after clamping.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tag_prefix(&self) -> &str {
        &self.tag_prefix
    }

    pub fn source_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn sink_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Attach a source polled every [`interval`](Pipeline::interval).
    ///
    /// # Errors
    /// Fails once the pipeline has been started.
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn Source>,
    ) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.inputs
            .push(InputStage::new(name, source, self.report_tx.clone()));
        Ok(())
    }

    /// Attach a sink flushed every [`interval`](Pipeline::interval).
    ///
    /// # Errors
    /// Fails once the pipeline has been started.
    pub fn add_sink(
        &mut self,
        name: impl Into<String>,
        sink: Box<dyn Sink>,
    ) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.outputs.push(OutputStage::new(
            name,
            sink,
            self.interval,
            self.output_capacity,
        ));
        Ok(())
    }

    /// Start every sink, then every source, then the fan-out task.
    ///
    /// Returns once everything is running. If any plugin fails to open, the
    /// stages already started are stopped again and the error is returned;
    /// the pipeline cannot be restarted after that.
    ///
    /// # Errors
    /// Returns `PipelineError::Open` for the first plugin that fails to open,
    /// `AlreadyStarted`/`Stopped` if the pipeline is not fresh.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        let report_rx = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Idle(rx) => rx,
            StageState::Running(worker) => {
                self.state = StageState::Running(worker);
                return Err(PipelineError::AlreadyStarted(PIPELINE.to_string()));
            }
            StageState::Stopped => return Err(PipelineError::Stopped(PIPELINE.to_string())),
        };

        tracing::info!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            interval = ?self.interval,
            tag_prefix = %self.tag_prefix,
            "Starting pipeline"
        );

        if let Err(e) = self.start_stages().await {
            tracing::error!(error = %e, "Pipeline failed to start, rolling back");
            self.stop_inputs().await;
            self.stop_outputs().await;
            return Err(e);
        }

        let targets: Vec<_> = self.outputs.iter().map(OutputStage::sender).collect();
        self.state = StageState::Running(Worker::spawn(|stop_rx| fan_out(report_rx, targets, stop_rx)));
        tracing::info!("Pipeline running");
        Ok(())
    }

    /// Stop everything, delivering every report produced so far.
    ///
    /// Sources stop first. The fan-out task then forwards whatever is still
    /// queued on the shared channel, and finally each sink flushes its buffer
    /// and is closed. A pipeline that is not running is left untouched.
    pub async fn stop(&mut self) {
        let fanout = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Running(worker) => worker,
            other => {
                self.state = other;
                return;
            }
        };

        tracing::info!("Stopping pipeline");
        self.stop_inputs().await;
        if let Err(e) = fanout.stop().await {
            tracing::error!(error = %e, "Fan-out task failed");
        }
        self.stop_outputs().await;
        tracing::info!("Pipeline stopped");
    }

    async fn start_stages(&mut self) -> Result<(), PipelineError> {
        for output in &mut self.outputs {
            output.start().await?;
        }
        for input in &mut self.inputs {
            input.start(self.interval, &self.tag_prefix).await?;
        }
        Ok(())
    }

    async fn stop_inputs(&mut self) {
        for input in &mut self.inputs {
            input.stop().await;
        }
    }

    async fn stop_outputs(&mut self) {
        for output in &mut self.outputs {
            output.stop().await;
        }
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        match self.state {
            StageState::Idle(_) => Ok(()),
            StageState::Running(_) => Err(PipelineError::AlreadyStarted(PIPELINE.to_string())),
            StageState::Stopped => Err(PipelineError::Stopped(PIPELINE.to_string())),
        }
    }
}

/// Forward every report to every output until stopped.
///
/// On stop, reports still queued on `reports` are forwarded before exiting.
async fn fan_out(
    mut reports: mpsc::Receiver<Arc<Report>>,
    targets: Vec<mpsc::Sender<Arc<Report>>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                while let Ok(report) = reports.try_recv() {
                    forward(&targets, report).await;
                }
                break;
            }
            report = reports.recv() => match report {
                Some(report) => forward(&targets, report).await,
                None => break,
            },
        }
    }
    tracing::debug!("Fan-out exited");
}

async fn forward(targets: &[mpsc::Sender<Arc<Report>>], report: Arc<Report>) {
    for tx in targets {
        if tx.send(Arc::clone(&report)).await.is_err() {
            tracing::warn!("Output channel closed, report dropped for that output");
        }
    }
}
