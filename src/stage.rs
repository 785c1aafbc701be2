//! Stage lifecycle and the core stage trait.
//!
//! A stage is one unit of pipelined frame processing with an explicit
//! lifecycle. Stages are owned by a [`StageTask`](crate::task::StageTask),
//! which drives `process_frame` in a paced loop on a dedicated thread
//! until every owned stage reports done.

use crate::error::Result;

/// Lifecycle state of a stage.
///
/// Transitions are strictly one-directional:
/// `Init -> SetUp -> AllDataReady -> Done`. Re-entering the current or an
/// earlier state is a no-op (see [`StageState::advance`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    /// Freshly constructed, `setup` not yet run.
    Init,
    /// `setup` succeeded; the stage is processing frames.
    SetUp,
    /// No further input will arrive; in-flight frames may still be draining.
    AllDataReady,
    /// Every frame the stage produced has been consumed and returned.
    Done,
}

impl StageState {
    /// True in both `AllDataReady` and `Done`.
    pub fn is_all_data_ready(&self) -> bool {
        *self >= StageState::AllDataReady
    }

    /// Advance to `next` if it is a forward transition.
    ///
    /// Returns true when the state actually changed. Setting the current
    /// or an earlier state is a no-op, which makes the transitions
    /// idempotent-safe.
    pub fn advance(&mut self, next: StageState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// A unit of pipelined frame processing.
///
/// # Lifecycle
///
/// - `setup()` runs once before any frame is processed; failure aborts the
///   owning task before its loop starts.
/// - `process_frame()` is called repeatedly by the owning task until
///   `is_done()`. It must never block: waiting is expressed by returning
///   early and retrying on the next tick.
/// - `release()` runs exactly once after the stage is done or the task is
///   being torn down for any reason, including failure. It must be safe to
///   call even if `setup` partially failed. Teardown problems are logged
///   by the implementation, never propagated.
pub trait Stage: Send {
    /// Name of this stage, for logging and failure reports.
    fn name(&self) -> &str;

    /// Initialize collaborators and frame pools.
    fn setup(&mut self) -> Result<()>;

    /// Process one tick. Must not block.
    fn process_frame(&mut self) -> Result<()>;

    /// Release held resources.
    fn release(&mut self);

    /// True once the stage has reached [`StageState::Done`].
    fn is_done(&self) -> bool;
}
