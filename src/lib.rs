//! # Frameline
//!
//! A small engine for scheduling concurrent, stateful media pipeline
//! stages that exchange timestamped frames under backpressure, and for
//! merging per-track frame streams into one timestamp-ordered output.
//!
//! ## Architecture
//!
//! - **Frames** move by value between stages; each producing stage owns a
//!   fixed pool and accounts for every frame it ever produced in one of
//!   four sets ([`supply`]).
//! - **Stages** have a four-state lifecycle and a non-blocking
//!   `process_frame` tick ([`stage`]); concrete stages wrap external
//!   collaborators: capture devices, transform codecs, container sinks
//!   ([`stages`]).
//! - **Tasks** bind stages to one dedicated thread with frame pacing and
//!   cooperative pause/cancel ([`task`]); the **executor** runs many
//!   tasks, cancels siblings on the first failure, and delivers exactly
//!   one terminal notification ([`executor`]).
//! - **Utilities**: a deferred command relay for cross-thread control
//!   ([`relay`]) and a single-assignment cell for handing negotiated
//!   formats downstream ([`future`]).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use frameline::prelude::*;
//!
//! let capture = CaptureStage::new("mic", CaptureConfig::default(), my_source);
//! let encoder = EncoderStage::new("aac", my_codec, capture.provider());
//! let mut muxer = Muxer::new("mp4", Box::new(my_sink));
//! muxer.add_track(encoder.output_format(), encoder.provider())?;
//!
//! let stop = capture.control();
//! let mut recording = StageTask::new("recording");
//! recording.add_stage(capture);
//! recording.add_stage(encoder);
//! let mut writing = StageTask::new("writing");
//! writing.add_stage(muxer);
//!
//! let mut executor = StageExecutor::new(vec![recording, writing], my_listener);
//! executor.start()?;
//! // ... later ...
//! stop.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod error;
pub mod executor;
pub mod format;
pub mod frame;
pub mod future;
pub mod relay;
pub mod stage;
pub mod stages;
pub mod supply;
pub mod task;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ExecutorListener, StageExecutor};
    pub use crate::format::{MediaKind, TrackFormat};
    pub use crate::frame::{Frame, FrameFlags};
    pub use crate::future::OneShotCell;
    pub use crate::stage::{Stage, StageState};
    pub use crate::stages::{
        Capture, CaptureConfig, CaptureControl, CaptureStage, EncoderStage, Muxer, SampleSink,
        Transform, WavWriter,
    };
    pub use crate::supply::{FrameProvider, Supply};
    pub use crate::task::{StageTask, TaskHandle};
}

pub use error::{Error, Result};

#[cfg(test)]
mod pipeline_tests {
    //! End-to-end: capture -> encode -> mux across two executor tasks.

    use crate::error::{Error, Result};
    use crate::executor::{ExecutorListener, StageExecutor};
    use crate::format::TrackFormat;
    use crate::stages::capture::{CaptureConfig, CaptureStage};
    use crate::stages::encoder::EncoderStage;
    use crate::stages::muxer::Muxer;
    use crate::stages::testing::{LoopbackTransform, ScriptedCapture, VecSink};
    use crate::task::StageTask;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    /// Listener that lets the test block until a terminal event.
    #[derive(Clone, Default)]
    struct WaitingListener {
        finished: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        terminal: Arc<(Mutex<bool>, Condvar)>,
    }

    impl WaitingListener {
        fn notify(&self) {
            let (lock, cvar) = &*self.terminal;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        fn wait_terminal(&self, timeout: Duration) -> bool {
            let (lock, cvar) = &*self.terminal;
            let mut done = lock.lock().unwrap();
            while !*done {
                let (guard, wait) = cvar.wait_timeout(done, timeout).unwrap();
                done = guard;
                if wait.timed_out() {
                    return *done;
                }
            }
            true
        }
    }

    impl ExecutorListener for WaitingListener {
        fn on_all_tasks_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.notify();
        }

        fn on_task_failed(&self, task: &str, error: &Error) {
            eprintln!("task '{task}' failed: {error}");
            self.failed.fetch_add(1, Ordering::SeqCst);
            self.notify();
        }
    }

    #[test]
    fn test_record_encode_mux_pipeline() -> Result<()> {
        let config = CaptureConfig {
            sample_rate: 8_000,
            channels: 1,
            frame_millis: 20,
            pool_frames: 3,
        };

        let capture = CaptureStage::new(
            "mic",
            config.clone(),
            ScriptedCapture::new(12, config.frame_millis),
        );
        let stop = capture.control();

        let encoder = EncoderStage::new(
            "aac",
            LoopbackTransform::new(TrackFormat::aac(8_000, 1, 64_000), 4),
            capture.provider(),
        );
        let format = encoder.output_format();

        let sink = VecSink::new();
        let mut muxer = Muxer::new("mp4", Box::new(sink.clone()));
        muxer.add_track(format, encoder.provider())?;

        let mut recording = StageTask::new("recording").with_frame_interval(Duration::from_millis(1));
        recording.add_stage(capture);
        recording.add_stage(encoder);
        let mut writing = StageTask::new("writing").with_frame_interval(Duration::from_millis(1));
        writing.add_stage(muxer);

        let listener = WaitingListener::default();
        let mut executor = StageExecutor::new(vec![recording, writing], listener.clone());
        executor.start()?;

        // Let the source dry up, then request the stop that flags EOS.
        std::thread::sleep(Duration::from_millis(80));
        stop.stop();

        assert!(
            listener.wait_terminal(Duration::from_secs(10)),
            "pipeline did not reach a terminal event"
        );
        executor.join();

        assert_eq!(listener.finished.load(Ordering::SeqCst), 1);
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);

        // Every captured frame arrived in the container, in order.
        let writes = sink.writes();
        assert_eq!(writes.len(), 12);
        let pts: Vec<i64> = writes.iter().map(|w| w.pts_us).collect();
        let mut sorted = pts.clone();
        sorted.sort_unstable();
        assert_eq!(pts, sorted);
        assert_eq!(writes[0].payload.len(), config.frame_bytes());
        Ok(())
    }

    #[test]
    fn test_pause_freezes_pipeline_progress() -> Result<()> {
        let config = CaptureConfig {
            sample_rate: 8_000,
            channels: 1,
            frame_millis: 20,
            pool_frames: 3,
        };
        let capture = CaptureStage::new(
            "mic",
            config.clone(),
            ScriptedCapture::new(usize::MAX >> 1, config.frame_millis),
        );
        let supply = Arc::clone(capture.supply());
        let stop = capture.control();

        let mut task = StageTask::new("recording").with_frame_interval(Duration::from_millis(1));
        task.add_stage(capture);

        let listener = WaitingListener::default();
        let mut executor = StageExecutor::new(vec![task], listener.clone());
        executor.start()?;

        std::thread::sleep(Duration::from_millis(30));
        executor.pause();
        std::thread::sleep(Duration::from_millis(10));

        // Frozen: queue sizes stop moving while paused.
        let before = supply.processed_len();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(supply.processed_len(), before);

        executor.resume();
        stop.stop();

        // Nobody consumes, so the task cannot drain to done; cancel ends it.
        std::thread::sleep(Duration::from_millis(30));
        executor.cancel();
        assert!(listener.wait_terminal(Duration::from_secs(10)));
        executor.join();
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
