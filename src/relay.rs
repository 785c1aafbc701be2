//! Deferred command relay for cross-thread stage control.
//!
//! Foreign threads must not touch a stage's single-threaded state. Instead
//! they [`submit`](CommandRelay::submit) commands here; the owning stage
//! drains the relay from inside its own `process_frame`, so every command
//! runs on the stage's processing thread with no concurrent access to
//! stage-local mutable state.

use crate::error::{Error, Result};
use crate::supply::Supply;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

/// A deferred command, executed with the owning stage's supply as context.
pub type Command = Box<dyn FnOnce(&Supply) + Send>;

/// Thread-safe channel of commands that execute only inside the owning
/// stage's processing call.
///
/// A command executing during a drain must not submit new commands to the
/// same relay synchronously. Doing so is a consistency violation: the
/// reentrant command is dropped and the drain reports the violation
/// instead of risking an unbounded loop. Submissions from other threads
/// while a drain runs are fine; they execute on the next tick.
#[derive(Default)]
pub struct CommandRelay {
    pending: Mutex<Vec<Command>>,
    /// Thread currently running a drain, if any. A same-thread submit
    /// while this is set can only come from inside a draining command
    /// (the pending lock is not held across execution, so nothing else
    /// on that thread can be running).
    draining_on: Mutex<Option<ThreadId>>,
    reentered: AtomicBool,
}

impl CommandRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command. Callable from any thread; never executes the
    /// command.
    pub fn submit(&self, command: Command) {
        if *self.draining_on.lock().unwrap() == Some(thread::current().id()) {
            tracing::error!("command submitted to relay from inside its own drain; dropping it");
            self.reentered.store(true, Ordering::SeqCst);
            return;
        }
        self.pending.lock().unwrap().push(command);
    }

    /// Run every pending command on the calling thread.
    ///
    /// Returns `Error::Consistency` if a command submitted back into this
    /// relay synchronously during the drain.
    pub fn drain(&self, ctx: &Supply) -> Result<()> {
        let commands = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };

        *self.draining_on.lock().unwrap() = Some(thread::current().id());
        for command in commands {
            command(ctx);
        }
        *self.draining_on.lock().unwrap() = None;

        if self.reentered.swap(false, Ordering::SeqCst) {
            return Err(Error::Consistency(
                "command submitted to relay during its own drain".into(),
            ));
        }
        Ok(())
    }

    /// Number of commands waiting to run.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// True when no commands are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending command without running it.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}
