//! Frame supply: the buffer-exchange surface of a producing stage.
//!
//! A producing stage owns a `Supply`, the only part of it other threads
//! may touch. The supply tracks every frame the stage ever produced in
//! exactly one of four disjoint sets:
//!
//! - `free`: owned internally, not yet filled (pooled supplies only)
//! - `processed`: filled, awaiting a consumer's pull
//! - `outstanding`: pulled by a consumer, not yet returned (a count;
//!   ownership has left the stage)
//! - `recycled`: returned by the consumer, awaiting the stage's own
//!   reclamation logic
//!
//! For a pooled supply, `|free| + |processed| + outstanding + |recycled|`
//! equals the fixed pool size for the stage's lifetime. All four sets live
//! behind one mutex and are only mutated together, so the sum invariant
//! holds under concurrent pulls and returns from the consumer's thread.
//!
//! The stage state also lives here: the transition to `Done` has to be
//! checked against the queue contents atomically, and foreign threads
//! request `AllDataReady` through the command relay.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::relay::{Command, CommandRelay};
use crate::stage::StageState;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default bound on the `processed` queue. Once a supply holds this many
/// frames awaiting a consumer, production logic must skip the tick rather
/// than enqueue more.
pub const DEFAULT_OUTPUT_CAP: usize = 3;

/// The capability by which one stage's finished frames are pulled and
/// later returned by another.
///
/// Both operations are non-blocking; consumers poll. Frames come out in
/// the order they were enqueued.
pub trait FrameProvider: Send + Sync {
    /// Remove and return the oldest processed frame, if any.
    fn pull_output(&self) -> Option<Frame>;

    /// Give back a frame previously received from [`pull_output`].
    ///
    /// Returning a frame that was never pulled from this provider is a
    /// consistency violation.
    ///
    /// [`pull_output`]: Self::pull_output
    fn return_output(&self, frame: Frame) -> Result<()>;
}

struct Sets {
    free: VecDeque<Frame>,
    processed: VecDeque<Frame>,
    recycled: Vec<Frame>,
    outstanding: usize,
    state: StageState,
    /// `Some(n)` once a fixed pool of `n` frames has been installed.
    pool_size: Option<usize>,
}

/// Shared frame accounting for a producing stage.
///
/// Concrete stages hold an `Arc<Supply>`, hand clones to their consumers
/// as `Arc<dyn FrameProvider>`, and call [`housekeep`](Self::housekeep)
/// once per processing tick.
pub struct Supply {
    name: String,
    output_cap: usize,
    relay: CommandRelay,
    sets: Mutex<Sets>,
}

impl Supply {
    /// Create a supply with the default `processed` bound.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_output_cap(name, DEFAULT_OUTPUT_CAP)
    }

    /// Create a supply with a custom `processed` bound.
    pub fn with_output_cap(name: impl Into<String>, output_cap: usize) -> Self {
        Self {
            name: name.into(),
            output_cap,
            relay: CommandRelay::new(),
            sets: Mutex::new(Sets {
                free: VecDeque::new(),
                processed: VecDeque::new(),
                recycled: Vec::new(),
                outstanding: 0,
                state: StageState::Init,
                pool_size: None,
            }),
        }
    }

    /// Name of the owning stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seed the `free` set with a fixed pool of frames.
    ///
    /// Called once from the owning stage's `setup`; the pool size never
    /// changes afterwards. Supplies whose frames belong to an external
    /// collaborator (an encoder's output slots) never install a pool.
    pub fn install_pool(&self, frames: Vec<Frame>) -> Result<()> {
        let mut sets = self.sets.lock().unwrap();
        if sets.pool_size.is_some() {
            return Err(Error::Consistency(format!(
                "frame pool for '{}' already installed",
                self.name
            )));
        }
        sets.pool_size = Some(frames.len());
        sets.free = frames.into();
        Ok(())
    }

    /// Take a free frame for filling, if one is available.
    pub fn take_free(&self) -> Option<Frame> {
        self.sets.lock().unwrap().free.pop_front()
    }

    /// Put frames back into the `free` set, reset for refilling.
    pub fn restock(&self, frames: Vec<Frame>) {
        let mut sets = self.sets.lock().unwrap();
        for mut frame in frames {
            frame.reset();
            sets.free.push_back(frame);
        }
    }

    /// Move a filled frame into `processed`, making it visible to
    /// [`FrameProvider::pull_output`].
    pub fn enqueue_processed(&self, frame: Frame) {
        self.sets.lock().unwrap().processed.push_back(frame);
    }

    /// True while `processed` is below the backpressure bound.
    ///
    /// Production logic checks this before generating output; at the cap
    /// it skips the tick and retries, never blocking the thread.
    pub fn has_output_capacity(&self) -> bool {
        self.sets.lock().unwrap().processed.len() < self.output_cap
    }

    /// Enqueue a command for execution inside the owning stage's next
    /// processing tick. Callable from any thread.
    pub fn submit(&self, command: Command) {
        self.relay.submit(command);
    }

    /// The shared per-tick step every producing stage runs first.
    ///
    /// 1. Atomically swap out the `recycled` set and, outside the lock,
    ///    hand it to the stage-specific `reclaim` hook (return slots to a
    ///    codec, restock a capture pool).
    /// 2. Drain the command relay on this thread.
    /// 3. Re-check the termination invariant: once the stage is
    ///    all-data-ready and `processed`, `recycled` and the outstanding
    ///    count are all empty, every frame ever produced has come home
    ///    and the stage transitions to `Done`.
    pub fn housekeep<F>(&self, reclaim: F) -> Result<()>
    where
        F: FnOnce(Vec<Frame>) -> Result<()>,
    {
        let returned = std::mem::take(&mut self.sets.lock().unwrap().recycled);
        if !returned.is_empty() {
            reclaim(returned)?;
        }

        self.relay.drain(self)?;

        let mut sets = self.sets.lock().unwrap();
        if sets.state.is_all_data_ready()
            && sets.processed.is_empty()
            && sets.recycled.is_empty()
            && sets.outstanding == 0
            && sets.state.advance(StageState::Done)
        {
            tracing::info!("stage '{}' is done", self.name);
        }
        Ok(())
    }

    /// Record that `setup` succeeded.
    pub fn mark_set_up(&self) {
        self.sets.lock().unwrap().state.advance(StageState::SetUp);
    }

    /// Declare that no further input will arrive.
    pub fn mark_all_data_ready(&self) {
        let mut sets = self.sets.lock().unwrap();
        if sets.state.advance(StageState::AllDataReady) {
            tracing::debug!("stage '{}' has all data ready", self.name);
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StageState {
        self.sets.lock().unwrap().state
    }

    /// True in `AllDataReady` and `Done`.
    pub fn is_all_data_ready(&self) -> bool {
        self.state().is_all_data_ready()
    }

    /// True once the stage has reached `Done`.
    pub fn is_done(&self) -> bool {
        self.state() == StageState::Done
    }

    /// Number of free frames.
    pub fn free_len(&self) -> usize {
        self.sets.lock().unwrap().free.len()
    }

    /// Number of frames awaiting a consumer.
    pub fn processed_len(&self) -> usize {
        self.sets.lock().unwrap().processed.len()
    }

    /// Number of frames currently held by consumers.
    pub fn outstanding(&self) -> usize {
        self.sets.lock().unwrap().outstanding
    }

    /// Number of returned frames awaiting reclamation.
    pub fn recycled_len(&self) -> usize {
        self.sets.lock().unwrap().recycled.len()
    }

    /// Fixed pool size, once installed.
    pub fn pool_size(&self) -> Option<usize> {
        self.sets.lock().unwrap().pool_size
    }
}

impl FrameProvider for Supply {
    fn pull_output(&self) -> Option<Frame> {
        let mut sets = self.sets.lock().unwrap();
        let frame = sets.processed.pop_front();
        if frame.is_some() {
            sets.outstanding += 1;
        }
        frame
    }

    fn return_output(&self, frame: Frame) -> Result<()> {
        let mut sets = self.sets.lock().unwrap();
        if sets.outstanding == 0 {
            return Err(Error::Consistency(format!(
                "frame returned to '{}' that was never pulled from it",
                self.name
            )));
        }
        if let Some(pool_size) = sets.pool_size {
            if frame.slot >= pool_size {
                return Err(Error::Consistency(format!(
                    "frame with unknown slot {} returned to '{}' (pool size {})",
                    frame.slot, self.name, pool_size
                )));
            }
        }
        sets.outstanding -= 1;
        sets.recycled.push(frame);
        Ok(())
    }
}
