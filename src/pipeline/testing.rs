//! Mock plugins shared by the pipeline unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::plugin::{PluginError, Sink, Source};
use crate::report::{Record, Report};

#[derive(Default)]
struct SourceCounters {
    opens: AtomicUsize,
    samples: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    fail_on_call: AtomicUsize,
}

/// Test-side view of a [`MockSource`].
#[derive(Clone, Default)]
pub(crate) struct SourceTap(Arc<SourceCounters>);

impl SourceTap {
    pub(crate) fn opens(&self) -> usize {
        self.0.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn samples(&self) -> usize {
        self.0.samples.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.0.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_open(&self) {
        self.0.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_close(&self) {
        self.0.fail_close.store(true, Ordering::SeqCst);
    }

    /// Make the n-th (1-based) `sample` call fail.
    pub(crate) fn fail_on_call(&self, n: usize) {
        self.0.fail_on_call.store(n, Ordering::SeqCst);
    }
}

enum Output {
    /// One record named `.0` whose value is the 1-based call number.
    Counting(String),
    Fixed(Vec<Record>),
}

pub(crate) struct MockSource {
    tap: SourceTap,
    output: Output,
}

impl MockSource {
    pub(crate) fn counting(name: &str) -> (SourceTap, Self) {
        Self::with_output(Output::Counting(name.to_string()))
    }

    pub(crate) fn fixed(records: Vec<Record>) -> (SourceTap, Self) {
        Self::with_output(Output::Fixed(records))
    }

    fn with_output(output: Output) -> (SourceTap, Self) {
        let tap = SourceTap::default();
        (
            tap.clone(),
            Self {
                tap,
                output,
            },
        )
    }
}

#[async_trait::async_trait]
impl Source for MockSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        self.tap.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.tap.0.fail_open.load(Ordering::SeqCst) {
            return Err(PluginError::Unavailable("mock open failure".to_string()));
        }
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let call = self.tap.0.samples.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tap.0.fail_on_call.load(Ordering::SeqCst) == call {
            return Err(PluginError::Unavailable(format!("mock failure on call {call}")));
        }
        Ok(match &self.output {
            Output::Counting(name) => vec![Record::new(name.clone(), call as f64, 1)],
            Output::Fixed(records) => records.clone(),
        })
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.tap.0.closes.fetch_add(1, Ordering::SeqCst);
        if self.tap.0.fail_close.load(Ordering::SeqCst) {
            return Err(PluginError::Unavailable("mock close failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    batches: Mutex<Vec<Vec<Arc<Report>>>>,
    flush_times: Mutex<Vec<Instant>>,
    opens: AtomicUsize,
    handles: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_handle: AtomicBool,
}

/// Test-side view of a [`RecordingSink`].
#[derive(Clone, Default)]
pub(crate) struct SinkTap(Arc<SinkState>);

impl SinkTap {
    /// Batches delivered successfully.
    pub(crate) fn batches(&self) -> Vec<Vec<Arc<Report>>> {
        self.0.batches.lock().unwrap().clone()
    }

    /// Every report delivered, in delivery order.
    pub(crate) fn reports(&self) -> Vec<Arc<Report>> {
        self.batches().into_iter().flatten().collect()
    }

    /// Clock readings of every `handle` call, failed ones included.
    pub(crate) fn flush_times(&self) -> Vec<Instant> {
        self.0.flush_times.lock().unwrap().clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.0.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn handles(&self) -> usize {
        self.0.handles.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.0.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_open(&self) {
        self.0.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_handle(&self, fail: bool) {
        self.0.fail_handle.store(fail, Ordering::SeqCst);
    }
}

pub(crate) struct RecordingSink {
    tap: SinkTap,
}

impl RecordingSink {
    pub(crate) fn new() -> (SinkTap, Self) {
        let tap = SinkTap::default();
        (tap.clone(), Self { tap })
    }
}

#[async_trait::async_trait]
impl Sink for RecordingSink {
    async fn open(&mut self) -> Result<(), PluginError> {
        self.tap.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.tap.0.fail_open.load(Ordering::SeqCst) {
            return Err(PluginError::Unavailable("mock open failure".to_string()));
        }
        Ok(())
    }

    async fn handle(&mut self, batch: &[Arc<Report>]) -> Result<(), PluginError> {
        self.tap.0.handles.fetch_add(1, Ordering::SeqCst);
        self.tap.0.flush_times.lock().unwrap().push(Instant::now());
        if self.tap.0.fail_handle.load(Ordering::SeqCst) {
            return Err(PluginError::Unavailable("mock handle failure".to_string()));
        }
        self.tap.0.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.tap.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
