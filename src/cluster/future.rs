use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::cluster::Address;
use crate::engine::{Outcome, Progress, Terminal};
use crate::error::{ExecError, TaskError};

/// Where a submission stands, as seen from its terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Still running.
    Pending,
    /// Every terminal produced a value.
    Finished,
    /// A terminal failed, or the scheduler did.
    Error,
    /// A terminal was never started because the submission was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    progress: Progress,
    finished: bool,
}

struct State {
    progress: Progress,
    outcome: Option<Result<Arc<Outcome>, ExecError>>,
}

/// Shared between a [`TaskFuture`] and the thread driving its evaluation.
pub(crate) struct Submission {
    pub(crate) id: u64,
    pub(crate) cancelled: AtomicBool,
    state: Mutex<State>,
    done: Condvar,
    #[cfg(feature = "tokio")]
    watch: tokio::sync::watch::Sender<Snapshot>,
}

impl Submission {
    pub(crate) fn new(id: u64, total: usize) -> Self {
        let progress = Progress {
            total,
            ..Progress::default()
        };

        Self {
            id,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(State {
                progress,
                outcome: None,
            }),
            done: Condvar::new(),
            #[cfg(feature = "tokio")]
            watch: tokio::sync::watch::Sender::new(Snapshot {
                progress,
                finished: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update(&self, progress: Progress) {
        self.lock().progress = progress;

        #[cfg(feature = "tokio")]
        self.watch.send_modify(|snapshot| snapshot.progress = progress);
    }

    pub(crate) fn finish(&self, result: Result<Outcome, ExecError>) {
        let mut state = self.lock();

        if let Ok(outcome) = &result {
            state.progress = outcome.progress();
        }

        let progress = state.progress;
        state.outcome = Some(result.map(Arc::new));
        drop(state);

        self.done.notify_all();

        #[cfg(feature = "tokio")]
        self.watch.send_replace(Snapshot {
            progress,
            finished: true,
        });
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            progress: state.progress,
            finished: state.outcome.is_some(),
        }
    }

    fn wait(&self) -> Result<Arc<Outcome>, ExecError> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<Outcome>, ExecError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, _) = self
                .done
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

/// A handle to a graph submitted to a cluster.
///
/// The future can be polled for status and progress, cancelled, and waited
/// on, either blocking with [`TaskFuture::wait`] or asynchronously with
/// [`TaskFuture::result`]. A failed terminal yields the error of the task
/// where the failure originated, not a generic one.
pub struct TaskFuture<X: Terminal> {
    submission: Arc<Submission>,
    terminal: X,
    address: Address,
}

impl<X: Terminal> TaskFuture<X> {
    pub(crate) fn new(submission: Arc<Submission>, terminal: X, address: Address) -> Self {
        Self {
            submission,
            terminal,
            address,
        }
    }

    /// Submission number, unique per cluster.
    pub fn id(&self) -> u64 {
        self.submission.id
    }

    /// Address of the cluster evaluating this submission.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn progress(&self) -> Progress {
        self.submission.snapshot().progress
    }

    /// Whether the evaluation has finished, successfully or not.
    pub fn done(&self) -> bool {
        self.submission.snapshot().finished
    }

    pub fn status(&self) -> Status {
        let state = self.submission.lock();

        match &state.outcome {
            None => Status::Pending,
            Some(Err(_)) => Status::Error,
            Some(Ok(outcome)) => match self.terminal.collect(outcome) {
                Ok(_) => Status::Finished,
                Err(ExecError::Task(TaskError::Cancelled { .. })) => Status::Cancelled,
                Err(_) => Status::Error,
            },
        }
    }

    /// Stops starting new tasks. Tasks already running finish; every node
    /// not yet started settles as cancelled. No effect once done.
    pub fn cancel(&self) {
        if !self.submission.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!(submission = self.submission.id, address = %self.address, "cancelling");
        }
    }

    /// Blocks until the evaluation finishes and returns the terminal values.
    pub fn wait(&self) -> Result<X::Owned, ExecError> {
        let outcome = self.submission.wait()?;
        self.terminal.collect(&outcome)
    }

    /// Like [`TaskFuture::wait`], but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<X::Owned, ExecError>> {
        self.submission
            .wait_timeout(timeout)
            .map(|outcome| outcome.and_then(|outcome| self.terminal.collect(&outcome)))
    }

    /// Blocks until the evaluation finishes and returns the result of every
    /// node that took part, intermediate ones included.
    pub fn outcome(&self) -> Result<Arc<Outcome>, ExecError> {
        self.submission.wait()
    }

    /// Waits without blocking the async runtime.
    #[cfg(feature = "tokio")]
    pub async fn result(&self) -> Result<X::Owned, ExecError> {
        let mut receiver = self.submission.watch.subscribe();

        // The sender lives in the submission we hold, it can't be dropped.
        let _ = receiver.wait_for(|snapshot| snapshot.finished).await;

        self.wait()
    }

    /// Draws a progress bar on the terminal until the evaluation finishes,
    /// then returns its result.
    pub fn watch_progress(&self) -> Result<X::Owned, ExecError> {
        let snapshot = self.submission.snapshot();

        let pb = ProgressBar::new(snapshot.progress.total as u64);
        pb.set_style(crate::utils::get_style_future());
        pb.set_message(format!("submission {} on {}", self.id(), self.address));

        loop {
            let snapshot = self.submission.snapshot();
            pb.set_position(snapshot.progress.settled() as u64);

            if snapshot.finished {
                break;
            }

            let _ = self.submission.wait_timeout(Duration::from_millis(100));
        }

        let progress = self.progress();
        pb.finish_with_message(format!(
            "{} done, {} failed, {} cancelled",
            progress.completed, progress.failed, progress.cancelled
        ));

        self.wait()
    }
}

impl<X: Terminal> std::fmt::Debug for TaskFuture<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.submission.id)
            .field("address", &self.address)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}
