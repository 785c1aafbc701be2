//! Stage task: binds stages to one thread of execution.

use crate::error::Result;
use crate::stage::Stage;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default minimum wall-clock spacing between processing iterations.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(3);

/// Shared pause/cancel flags for one task.
#[derive(Default)]
struct TaskControl {
    paused: AtomicBool,
    canceled: AtomicBool,
}

/// Cloneable control handle for a running task.
///
/// All three operations are cooperative flags, observed once per loop
/// iteration: an in-flight `process_frame` call is never interrupted.
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    control: Arc<TaskControl>,
}

impl TaskHandle {
    /// Name of the task this handle controls.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Freeze progress between iterations. The thread stays alive,
    /// polling at the pacing interval, so it can resume cheaply.
    pub fn pause(&self) {
        tracing::info!("pause task '{}'", self.name);
        self.control.paused.store(true, Ordering::SeqCst);
    }

    /// Undo a pause.
    pub fn resume(&self) {
        tracing::info!("resume task '{}'", self.name);
        self.control.paused.store(false, Ordering::SeqCst);
    }

    /// Request termination. The loop exits at the next iteration
    /// boundary; stages are still released.
    pub fn cancel(&self) {
        tracing::info!("cancel task '{}'", self.name);
        self.control.canceled.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.control.canceled.load(Ordering::SeqCst)
    }
}

/// One or more stages sharing a single thread of execution.
///
/// The task runs `setup` on every stage, then a paced loop calling
/// `process_frame` on each not-yet-done stage in fixed order, then
/// `release` on every stage, which runs exactly once even when setup or
/// processing failed. An iteration that costs less than the frame
/// interval sleeps the remainder to cap CPU usage.
pub struct StageTask {
    name: Arc<str>,
    stages: SmallVec<[Box<dyn Stage>; 2]>,
    frame_interval: Duration,
    control: Arc<TaskControl>,
}

impl StageTask {
    /// Create an empty task.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            stages: SmallVec::new(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            control: Arc::new(TaskControl::default()),
        }
    }

    /// Set the minimum spacing between processing iterations.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Add a stage. Stages are processed in insertion order.
    pub fn add_stage(&mut self, stage: impl Stage + 'static) {
        self.stages.push(Box::new(stage));
    }

    /// Name of this task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A control handle for this task.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            name: Arc::clone(&self.name),
            control: Arc::clone(&self.control),
        }
    }

    /// Run the task to completion on the calling thread.
    ///
    /// Returns the first setup or processing error; `release` has run on
    /// every stage by the time this returns, whatever the outcome.
    pub fn run(mut self) -> Result<()> {
        let started = Instant::now();

        if let Err(e) = self.setup_stages() {
            self.release_stages();
            return Err(e);
        }

        tracing::info!("start processing task '{}'", self.name);
        let result = self.process_loop();

        self.release_stages();
        tracing::info!("task '{}' ran for {:?}", self.name, started.elapsed());
        result
    }

    fn setup_stages(&mut self) -> Result<()> {
        tracing::info!("setup task '{}'", self.name);
        for stage in &mut self.stages {
            stage.setup()?;
        }
        Ok(())
    }

    fn process_loop(&mut self) -> Result<()> {
        loop {
            if self.control.canceled.load(Ordering::SeqCst) {
                break;
            }

            let tick_start = Instant::now();

            if !self.control.paused.load(Ordering::SeqCst) {
                let mut all_done = true;
                for stage in &mut self.stages {
                    if !stage.is_done() {
                        all_done = false;
                        stage.process_frame()?;
                    }
                }
                if all_done {
                    break;
                }
            }

            // Cheap iterations sleep the remainder of the interval to
            // keep a tight poll loop from pinning the CPU.
            let cost = tick_start.elapsed();
            if cost < self.frame_interval {
                std::thread::sleep(self.frame_interval - cost);
            }
        }
        Ok(())
    }

    fn release_stages(&mut self) {
        tracing::info!("release task '{}'", self.name);
        for stage in &mut self.stages {
            stage.release();
        }
    }
}
