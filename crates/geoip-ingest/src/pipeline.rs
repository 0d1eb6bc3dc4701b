//! Pipeline coordinator
//!
//! Runs the source, transform and commit stages as three tasks joined by
//! bounded channels. One [`CancelSignal`] is shared by all of them: the
//! first stage to fail fires it, every other stage unwinds at its next
//! suspension point, and the coordinator reports the failing stage's error.
//!
//! A stage always fires the signal *before* its channel ends are dropped,
//! so a closed channel is only ever read as end of input when nobody failed.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::committer::BatchCommitter;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::progress::Throughput;
use crate::sink::DocumentSink;
use crate::source::RecordSource;
use crate::transform::transform_records;

/// One of the three pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Source,
    Transform,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Source => "source",
            Stage::Transform => "transform",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Why a run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A stage returned an error or panicked
    StageFailed(Stage),
    /// Interrupted by the caller, e.g. Ctrl+C
    External,
    /// The run outlived its deadline
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::StageFailed(stage) => write!(f, "{} stage failed", stage),
            CancelReason::External => f.write_str("interrupted"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Shared, set-once cancellation signal carrying the first reason given
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `false` if it had already fired, in which
    /// case the original reason is kept.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// The error a stage returns when it stops because of this signal
    pub fn error(&self) -> IngestError {
        IngestError::Cancelled {
            reason: self.reason().unwrap_or(CancelReason::External),
        }
    }

    /// Underlying token, for helpers that only need to observe the signal
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Terminal state for a finished run
    pub fn of<T>(outcome: &Result<T>) -> Self {
        match outcome {
            Ok(_) => RunState::Completed,
            Err(e) if e.is_cancellation() => RunState::Cancelled,
            Err(_) => RunState::Failed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// State shared by the stages of one run
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub cancel: CancelSignal,
    pub throughput: Arc<Throughput>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub documents: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

/// Holds a stage's channel ends and fires the cancel signal if the stage
/// ends without success, including by panic. Fields drop after `drop`
/// runs, so peers observe the signal before they observe a closed channel.
struct StageGuard<P> {
    stage: Stage,
    cancel: CancelSignal,
    finished: bool,
    held: P,
}

impl<P> StageGuard<P> {
    fn new(stage: Stage, cancel: CancelSignal, held: P) -> Self {
        Self {
            stage,
            cancel,
            finished: false,
            held,
        }
    }

    fn complete<T>(mut self, result: &Result<T>) {
        match result {
            Ok(_) => {
                debug!(stage = %self.stage, "Stage finished");
                self.finished = true;
            },
            Err(e) if e.is_cancellation() => {
                debug!(stage = %self.stage, "Stage stopped by cancellation");
            },
            Err(e) => {
                debug!(stage = %self.stage, error = %e, "Stage failed, cancelling pipeline");
            },
        }
    }
}

impl<P> Drop for StageGuard<P> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel(CancelReason::StageFailed(self.stage));
        }
    }
}

/// Three-stage bulk-load pipeline
pub struct Pipeline {
    sink: Arc<dyn DocumentSink>,
    batch_size: usize,
    channel_capacity: usize,
    progress_interval: Duration,
    deadline: Option<Duration>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn DocumentSink>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size,
            channel_capacity: crate::config::DEFAULT_CHANNEL_CAPACITY,
            progress_interval: Duration::from_secs(crate::config::DEFAULT_PROGRESS_INTERVAL_SECS),
            deadline: None,
            state: PipelineState::default(),
        }
    }

    /// Pipeline with every tunable taken from `config`
    pub fn from_config(sink: Arc<dyn DocumentSink>, config: &IngestConfig) -> Self {
        Self::new(sink, config.batch_size)
            .with_channel_capacity(config.channel_capacity)
            .with_progress_interval(config.progress_interval())
            .with_deadline(config.deadline())
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Signal that stops this run; clone it before calling [`Pipeline::run`]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.state.cancel.clone()
    }

    /// Committed-document counter of this run
    pub fn throughput(&self) -> Arc<Throughput> {
        self.state.throughput.clone()
    }

    /// Run all three stages to completion or first failure
    pub async fn run<R>(self, source: RecordSource<R>) -> Result<PipelineSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if self.batch_size == 0 {
            return Err(IngestError::config("batch size must be a positive number"));
        }
        if self.channel_capacity == 0 {
            return Err(IngestError::config("channel capacity must be a positive number"));
        }

        let PipelineState { cancel, throughput } = self.state;
        throughput.restart();

        let (record_tx, record_rx) = mpsc::channel(self.channel_capacity);
        let (doc_tx, doc_rx) = mpsc::channel(self.channel_capacity);

        let committer = BatchCommitter::new(self.sink.clone(), self.batch_size, throughput.clone())
            .with_progress_interval(self.progress_interval);

        let deadline = self.deadline.map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {},
                    _ = tokio::time::sleep(limit) => {
                        if cancel.cancel(CancelReason::DeadlineExceeded) {
                            warn!(?limit, "Deadline reached, cancelling pipeline");
                        }
                    },
                }
            })
        });

        let source_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let guard = StageGuard::new(Stage::Source, cancel.clone(), record_tx);
                let result = source.produce(&guard.held, &cancel).await;
                guard.complete(&result);
                result
            })
        };

        let transform_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut guard = StageGuard::new(Stage::Transform, cancel.clone(), (record_rx, doc_tx));
                let (rx, tx) = &mut guard.held;
                let result = transform_records(rx, tx, &cancel).await;
                guard.complete(&result);
                result
            })
        };

        let commit_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut guard = StageGuard::new(Stage::Commit, cancel.clone(), doc_rx);
                let result = committer.run(&mut guard.held, &cancel).await;
                guard.complete(&result);
                result
            })
        };

        info!(
            state = %RunState::Running,
            sink = self.sink.name(),
            batch_size = self.batch_size,
            channel_capacity = self.channel_capacity,
            "Pipeline started"
        );

        let (source_res, transform_res, commit_res) =
            tokio::join!(source_task, transform_task, commit_task);

        if let Some(timer) = deadline {
            timer.abort();
        }

        let outcome = match (
            joined(Stage::Source, source_res),
            joined(Stage::Transform, transform_res),
            joined(Stage::Commit, commit_res),
        ) {
            (Ok(records), Ok(_), Ok(stats)) => {
                debug!(records, "All stages finished");
                Ok(PipelineSummary {
                    documents: stats.documents,
                    batches: stats.batches,
                    elapsed: throughput.elapsed(),
                })
            },
            (source, transform, commit) => Err(root_cause([source.err(), transform.err(), commit.err()])),
        };

        let state = RunState::of(&outcome);
        match &outcome {
            Ok(summary) => info!(
                %state,
                documents = summary.documents,
                batches = summary.batches,
                elapsed = ?summary.elapsed,
                "Pipeline finished"
            ),
            Err(e) => debug!(%state, kind = %e.kind(), error = %e, "Pipeline stopped"),
        }

        outcome
    }
}

fn joined<T>(stage: Stage, result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.map_err(|e| IngestError::stage_aborted(stage, e.to_string()))?
}

/// First non-cancellation error in stage order, else the first error
fn root_cause(errors: [Option<IngestError>; 3]) -> IngestError {
    let mut errors: Vec<IngestError> = errors.into_iter().flatten().collect();
    match errors.iter().position(|e| !e.is_cancellation()) {
        Some(index) => errors.swap_remove(index),
        None if !errors.is_empty() => errors.swap_remove(0),
        None => IngestError::stage_aborted(Stage::Commit, "pipeline failed without an error"),
    }
}
