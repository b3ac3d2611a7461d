use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::strategy::StrategyKind;
use crate::surface::SharedSurface;
use crate::time::ExecutionInfo;

use super::SubmitError;

/// Monotonic, session-unique submission number.
pub type SubmissionId = u64;

/// Lifecycle of one submission. Transitions only move forward.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SubmissionState {
    Created,
    Encoded,
    Committed,
    Completed { succeeded: bool },
}

impl SubmissionState {
    fn rank(self) -> u8 {
        match self {
            SubmissionState::Created => 0,
            SubmissionState::Encoded => 1,
            SubmissionState::Committed => 2,
            SubmissionState::Completed { .. } => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Completed { .. })
    }
}

/// A completed render: the destination surface plus its timing.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub id: SubmissionId,
    pub strategy: StrategyKind,
    pub surface: SharedSurface,
    pub info: ExecutionInfo,
}

pub type SubmissionResult = Result<RenderOutput, SubmitError>;

/// Shared state cell tracking one submission through its lifecycle.
#[derive(Clone)]
pub(crate) struct Tracker {
    id: SubmissionId,
    state: Arc<Mutex<SubmissionState>>,
}

impl Tracker {
    pub(crate) fn new(id: SubmissionId) -> Self {
        log::debug!("submission #{id}: created");
        Self {
            id,
            state: Arc::new(Mutex::new(SubmissionState::Created)),
        }
    }

    pub(crate) fn id(&self) -> SubmissionId {
        self.id
    }

    pub(crate) fn advance(&self, next: SubmissionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            next.rank() > state.rank(),
            "submission #{} moved backwards: {:?} -> {next:?}",
            self.id,
            *state
        );
        *state = next;
        log::debug!("submission #{}: {next:?}", self.id);
    }

    pub(crate) fn get(&self) -> SubmissionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a committed submission.
///
/// The result arrives exactly once, from the backend's completion thread.
pub struct Submission {
    id: SubmissionId,
    strategy: StrategyKind,
    tracker: Tracker,
    rx: Receiver<SubmissionResult>,
    result: Option<SubmissionResult>,
}

impl Submission {
    pub(crate) fn new(
        id: SubmissionId,
        strategy: StrategyKind,
        tracker: Tracker,
        rx: Receiver<SubmissionResult>,
    ) -> Self {
        Self {
            id,
            strategy,
            tracker,
            rx,
            result: None,
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn state(&self) -> SubmissionState {
        self.tracker.get()
    }

    /// Blocks until the submission completes.
    pub fn wait(self) -> SubmissionResult {
        match self.result {
            Some(result) => result,
            None => self.rx.recv().unwrap_or(Err(SubmitError::Disconnected)),
        }
    }

    /// Blocks for at most `timeout`. Gives the handle back if still pending.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<SubmissionResult, Self> {
        if let Some(result) = self.result.take() {
            return Ok(result);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(self),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(Err(SubmitError::Disconnected)),
        }
    }

    /// Non-blocking poll. Returns the result once it has arrived.
    pub fn try_result(&mut self) -> Option<&SubmissionResult> {
        if self.result.is_none() {
            match self.rx.try_recv() {
                Ok(result) => self.result = Some(result),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.result = Some(Err(SubmitError::Disconnected)),
            }
        }
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let tracker = Tracker::new(1);
        tracker.advance(SubmissionState::Encoded);
        tracker.advance(SubmissionState::Committed);
        tracker.advance(SubmissionState::Completed { succeeded: true });
        assert!(tracker.get().is_terminal());
    }

    #[test]
    fn dropped_sender_reports_disconnected() {
        let (tx, rx) = mpsc::channel();
        let mut submission = Submission::new(7, StrategyKind::ComputeDispatch, Tracker::new(7), rx);
        assert!(submission.try_result().is_none());
        drop(tx);
        assert!(matches!(submission.try_result(), Some(Err(SubmitError::Disconnected))));
    }
}
