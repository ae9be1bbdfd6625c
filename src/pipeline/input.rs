//! Input stage: polls one source on a timer and publishes tagged reports.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::pipeline::worker::{StageState, Worker};
use crate::pipeline::{PipelineError, clamp_interval};
use crate::plugin::{PluginKind, Source};
use crate::report::{Record, Report};

/// Owns one [`Source`] and the task polling it.
pub struct InputStage {
    name: String,
    tx: mpsc::Sender<Arc<Report>>,
    state: StageState<Box<dyn Source>>,
}

impl std::fmt::Debug for InputStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStage")
            .field("name", &self.name)
            .field("running", &self.state.is_running())
            .finish_non_exhaustive()
    }
}

impl InputStage {
    /// Attach a source that will publish onto `tx`.
    pub fn new(name: impl Into<String>, source: Box<dyn Source>, tx: mpsc::Sender<Arc<Report>>) -> Self {
        Self {
            name: name.into(),
            tx,
            state: StageState::Idle(source),
        }
    }

    /// Stage name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the polling task is running.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Open the source and start polling every `interval`.
    ///
    /// The first poll happens one `interval` after start. Intervals below
    /// [`MIN_INTERVAL`](crate::pipeline::MIN_INTERVAL) are raised to it. A
    /// non-empty `tag_prefix` is prepended to every record name.
    ///
    /// # Errors
    /// Returns `PipelineError::Open` if the source fails to open; nothing is
    /// polled in that case and the stage can be started again.
    pub async fn start(&mut self, interval: Duration, tag_prefix: &str) -> Result<(), PipelineError> {
        let interval = clamp_interval(interval);
        let mut source = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Idle(source) => source,
            StageState::Running(worker) => {
                self.state = StageState::Running(worker);
                return Err(PipelineError::AlreadyStarted(self.name.clone()));
            }
            StageState::Stopped => return Err(PipelineError::Stopped(self.name.clone())),
        };

        if let Err(e) = source.open().await {
            tracing::error!(stage = %self.name, error = %e, "Failed to open input");
            self.state = StageState::Idle(source);
            return Err(PipelineError::Open {
                kind: PluginKind::Source,
                stage: self.name.clone(),
                source: e,
            });
        }

        let poller = Poller {
            name: self.name.clone(),
            source,
            tx: self.tx.clone(),
            tag_prefix: tag_prefix.to_string(),
        };
        self.state = StageState::Running(Worker::spawn(|stop_rx| poller.run(interval, stop_rx)));
        tracing::debug!(stage = %self.name, interval = ?interval, "Input started");
        Ok(())
    }

    /// Stop polling, wait for the task to exit, then close the source.
    ///
    /// Close errors are logged, not returned. A stage that is not running is
    /// left untouched.
    pub async fn stop(&mut self) {
        let worker = match std::mem::replace(&mut self.state, StageState::Stopped) {
            StageState::Running(worker) => worker,
            other => {
                self.state = other;
                return;
            }
        };

        match worker.stop().await {
            Ok(mut source) => {
                if let Err(e) = source.close().await {
                    tracing::error!(stage = %self.name, error = %e, "Failed to close input");
                }
            }
            Err(e) => {
                tracing::error!(stage = %self.name, error = %e, "Input task failed, source not closed");
            }
        }
        tracing::debug!(stage = %self.name, "Input stopped");
    }
}

/// Prepend `prefix` to every record name.
pub(crate) fn apply_prefix(records: &mut [Record], prefix: &str) {
    if prefix.is_empty() {
        return;
    }
    for record in records {
        record.name.insert_str(0, prefix);
    }
}

/// State moved into the polling task.
struct Poller {
    name: String,
    source: Box<dyn Source>,
    tx: mpsc::Sender<Arc<Report>>,
    tag_prefix: String,
}

impl Poller {
    async fn run(mut self, interval: Duration, mut stop_rx: oneshot::Receiver<()>) -> Box<dyn Source> {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Stop wins over a tick that is already due; that tick is not sampled.
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    if !self.poll().await {
                        break;
                    }
                }
            }
        }
        self.source
    }

    /// One sampling cycle. Returns false once the report channel is closed.
    async fn poll(&mut self) -> bool {
        let ts = Utc::now();
        let mut records = match self.source.sample().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(stage = %self.name, error = %e, "Failed to sample input");
                return true;
            }
        };
        if records.is_empty() {
            tracing::debug!(stage = %self.name, "Sample yielded no records");
            return true;
        }

        apply_prefix(&mut records, &self.tag_prefix);
        if self.tx.send(Arc::new(Report::new(ts, records))).await.is_err() {
            tracing::warn!(stage = %self.name, "Report channel closed, input exiting");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::MockSource;

    const TICK: Duration = Duration::from_secs(1);

    #[test]
    fn test_apply_prefix() {
        let mut records = vec![Record::new("cpu.percent", 1.0, 1)];
        apply_prefix(&mut records, "host1.");
        assert_eq!(records[0].name, "host1.cpu.percent");

        apply_prefix(&mut records, "");
        assert_eq!(records[0].name, "host1.cpu.percent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_prefixed_reports_in_tick_order() {
        let (tap, source) = MockSource::counting("cpu.percent");
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = InputStage::new("cpu", Box::new(source), tx);

        stage.start(TICK, "host1.").await.unwrap();
        time::sleep(Duration::from_millis(3500)).await;
        stage.stop().await;

        let mut values = Vec::new();
        while let Ok(report) = rx.try_recv() {
            assert_eq!(report.records.len(), 1);
            assert_eq!(report.records[0].name, "host1.cpu.percent");
            values.push(report.records[0].value);
        }
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(tap.opens(), 1);
        assert_eq!(tap.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_prefix_keeps_names() {
        let (_tap, source) = MockSource::counting("cpu.percent");
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = InputStage::new("cpu", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        time::sleep(Duration::from_millis(1500)).await;
        stage.stop().await;

        let report = rx.try_recv().unwrap();
        assert_eq!(report.records[0].name, "cpu.percent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_error_skips_only_that_tick() {
        let (tap, source) = MockSource::counting("x");
        tap.fail_on_call(2);
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = InputStage::new("flaky", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        time::sleep(Duration::from_millis(3500)).await;
        stage.stop().await;

        let mut values = Vec::new();
        while let Ok(report) = rx.try_recv() {
            values.push(report.records[0].value);
        }
        assert_eq!(values, vec![1.0, 3.0]);
        assert_eq!(tap.samples(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_prevents_polling() {
        let (tap, source) = MockSource::counting("x");
        tap.fail_open();
        let (tx, _rx) = mpsc::channel(16);
        let mut stage = InputStage::new("broken", Box::new(source), tx);

        let err = stage.start(TICK, "").await.unwrap_err();
        assert!(matches!(err, PipelineError::Open { kind: PluginKind::Source, .. }));
        assert!(!stage.is_running());

        time::sleep(Duration::from_secs(3)).await;
        stage.stop().await;
        assert_eq!(tap.samples(), 0);
        assert_eq!(tap.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_samples_are_not_published() {
        let (tap, source) = MockSource::fixed(vec![]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = InputStage::new("empty", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        time::sleep(Duration::from_millis(2500)).await;
        stage.stop().await;

        assert_eq!(tap.samples(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_twice() {
        let (tap, source) = MockSource::counting("x");
        let (tx, _rx) = mpsc::channel(16);
        let mut stage = InputStage::new("twice", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        assert!(matches!(
            stage.start(TICK, "").await,
            Err(PipelineError::AlreadyStarted(_))
        ));

        stage.stop().await;
        stage.stop().await;
        assert_eq!(tap.closes(), 1);
        assert!(matches!(
            stage.start(TICK, "").await,
            Err(PipelineError::Stopped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_error_is_swallowed() {
        let (tap, source) = MockSource::counting("x");
        tap.fail_close();
        let (tx, _rx) = mpsc::channel(16);
        let mut stage = InputStage::new("x", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        stage.stop().await;
        assert_eq!(tap.closes(), 1);
        assert!(!stage.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_polls_at_minimum() {
        let (tap, source) = MockSource::counting("x");
        let (tx, mut rx) = mpsc::channel(16);
        let mut stage = InputStage::new("zero", Box::new(source), tx);

        stage.start(Duration::ZERO, "").await.unwrap();
        assert!(stage.is_running());
        time::sleep(Duration::from_millis(2500)).await;
        stage.stop().await;

        assert_eq!(tap.samples(), 2);
        assert_eq!(rx.try_recv().unwrap().records[0].value, 1.0);
        assert_eq!(tap.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_channel_closed() {
        let (tap, source) = MockSource::counting("x");
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut stage = InputStage::new("orphan", Box::new(source), tx);

        stage.start(TICK, "").await.unwrap();
        time::sleep(Duration::from_millis(2500)).await;
        // The task exited after the first failed send.
        assert_eq!(tap.samples(), 1);
        stage.stop().await;
        assert_eq!(tap.closes(), 1);
    }
}
