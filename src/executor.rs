//! Stage executor: runs many tasks, detects failure, notifies once.

use crate::error::{Error, Result};
use crate::task::{StageTask, TaskHandle};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Observer of the executor's single terminal event.
pub trait ExecutorListener: Send {
    /// Every task completed normally.
    fn on_all_tasks_finished(&self);

    /// A task failed. Every sibling task has been canceled; `task` and
    /// `error` identify the first failure.
    fn on_task_failed(&self, task: &str, error: &Error);
}

struct ExecState {
    /// Names of tasks that have not yet reached a terminal event.
    live: Vec<String>,
    /// Cleared the first time a terminal event fires; a second event
    /// observes `None` and is a silent no-op.
    listener: Option<Box<dyn ExecutorListener>>,
}

struct ExecShared {
    state: Mutex<ExecState>,
    /// Handles for failure fan-out; fixed once `start` has spawned.
    handles: Vec<TaskHandle>,
}

impl ExecShared {
    /// Terminal bookkeeping for one task. The live set and the listener
    /// are updated under one lock, so exactly one terminal notification
    /// can ever be taken.
    fn task_finished(&self, name: &str, result: Result<()>) {
        let listener = {
            let mut state = self.state.lock().unwrap();
            state.live.retain(|n| n != name);

            match &result {
                Err(_) => state.listener.take(),
                Ok(()) if state.live.is_empty() => state.listener.take(),
                Ok(()) => None,
            }
        };

        match result {
            Err(error) => {
                tracing::error!("task '{}' failed: {}", name, error);
                for handle in &self.handles {
                    handle.cancel();
                }
                if let Some(listener) = listener {
                    listener.on_task_failed(name, &error);
                }
            }
            Ok(()) => {
                tracing::info!("task '{}' finished", name);
                if let Some(listener) = listener {
                    listener.on_all_tasks_finished();
                }
            }
        }
    }
}

/// Runs a set of [`StageTask`]s, one dedicated thread per task.
///
/// The first task failure is a global event: every sibling is canceled
/// and the listener hears about it exactly once, with the failing task's
/// identity and cause. Later failures and successes are swallowed. When
/// instead every task completes normally, the listener hears exactly one
/// success notification.
pub struct StageExecutor {
    shared: Arc<ExecShared>,
    pending: Vec<StageTask>,
    threads: Vec<JoinHandle<()>>,
}

impl StageExecutor {
    /// Create an executor over `tasks`, reporting to `listener`.
    pub fn new(tasks: Vec<StageTask>, listener: impl ExecutorListener + 'static) -> Self {
        let live = tasks.iter().map(|t| t.name().to_string()).collect();
        let handles = tasks.iter().map(|t| t.handle()).collect();
        Self {
            shared: Arc::new(ExecShared {
                state: Mutex::new(ExecState {
                    live,
                    listener: Some(Box::new(listener)),
                }),
                handles,
            }),
            pending: tasks,
            threads: Vec::new(),
        }
    }

    /// Spawn every task on its own named thread.
    ///
    /// A stage panic is caught and reported as a processing failure, so
    /// it goes through the same cancel-siblings-and-notify path as a
    /// returned error.
    pub fn start(&mut self) -> Result<()> {
        let tasks = std::mem::take(&mut self.pending);
        for task in tasks {
            let name = task.name().to_string();
            let thread_name = name.clone();
            let shared = Arc::clone(&self.shared);

            let thread = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| task.run()))
                        .unwrap_or_else(|payload| Err(Error::Process(panic_text(payload))));
                    shared.task_finished(&name, result);
                })
                .map_err(|e| Error::Setup(format!("spawning task thread '{thread_name}': {e}")))?;
            self.threads.push(thread);
        }
        Ok(())
    }

    /// Cancel every task.
    pub fn cancel(&self) {
        for handle in &self.shared.handles {
            handle.cancel();
        }
    }

    /// Pause every task.
    pub fn pause(&self) {
        for handle in &self.shared.handles {
            handle.pause();
        }
    }

    /// Resume every task.
    pub fn resume(&self) {
        for handle in &self.shared.handles {
            handle.resume();
        }
    }

    /// Wait for every spawned thread to exit.
    pub fn join(&mut self) {
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records terminal notifications for assertions.
    #[derive(Clone, Default)]
    struct RecordingListener {
        finished: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        failed_task: Arc<Mutex<Option<String>>>,
    }

    impl ExecutorListener for RecordingListener {
        fn on_all_tasks_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_failed(&self, task: &str, _error: &Error) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            *self.failed_task.lock().unwrap() = Some(task.to_string());
        }
    }

    /// Runs a fixed number of ticks, optionally failing at one of them.
    struct ScriptedStage {
        name: String,
        ticks_left: usize,
        fail_at_end: bool,
        canceled_observer: Option<Arc<AtomicBool>>,
    }

    impl ScriptedStage {
        fn ok(name: &str, ticks: usize) -> Self {
            Self {
                name: name.into(),
                ticks_left: ticks,
                fail_at_end: false,
                canceled_observer: None,
            }
        }

        fn failing(name: &str, ticks: usize) -> Self {
            Self {
                name: name.into(),
                ticks_left: ticks,
                fail_at_end: true,
                canceled_observer: None,
            }
        }
    }

    impl Stage for ScriptedStage {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self) -> Result<()> {
            Ok(())
        }

        fn process_frame(&mut self) -> Result<()> {
            if self.ticks_left == 0 {
                return Ok(());
            }
            self.ticks_left -= 1;
            if self.ticks_left == 0 && self.fail_at_end {
                return Err(Error::Process(format!("{} blew up", self.name)));
            }
            Ok(())
        }

        fn release(&mut self) {
            if let Some(flag) = &self.canceled_observer {
                flag.store(true, Ordering::SeqCst);
            }
        }

        fn is_done(&self) -> bool {
            self.ticks_left == 0 && !self.fail_at_end
        }
    }

    fn task_with(stage: ScriptedStage) -> StageTask {
        let mut task =
            StageTask::new(format!("task-{}", stage.name())).with_frame_interval(Duration::from_millis(1));
        task.add_stage(stage);
        task
    }

    #[test]
    fn test_all_tasks_finish_fires_once() {
        let listener = RecordingListener::default();
        let tasks = vec![
            task_with(ScriptedStage::ok("a", 3)),
            task_with(ScriptedStage::ok("b", 7)),
            task_with(ScriptedStage::ok("c", 1)),
        ];
        let mut executor = StageExecutor::new(tasks, listener.clone());
        executor.start().unwrap();
        executor.join();

        assert_eq!(listener.finished.load(Ordering::SeqCst), 1);
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_cancels_siblings_and_notifies_once() {
        let listener = RecordingListener::default();

        // Task 1 finishes quickly; task 2 fails; task 3 would run forever.
        let endless = ScriptedStage::ok("c", usize::MAX);
        let tasks = vec![
            task_with(ScriptedStage::ok("a", 1)),
            task_with(ScriptedStage::failing("b", 5)),
            task_with(endless),
        ];
        let mut executor = StageExecutor::new(tasks, listener.clone());
        executor.start().unwrap();
        executor.join();

        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
        assert_eq!(listener.finished.load(Ordering::SeqCst), 0);
        assert_eq!(
            listener.failed_task.lock().unwrap().as_deref(),
            Some("task-b")
        );
    }

    #[test]
    fn test_concurrent_second_failure_is_swallowed() {
        let listener = RecordingListener::default();
        let tasks = vec![
            task_with(ScriptedStage::failing("a", 2)),
            task_with(ScriptedStage::failing("b", 2)),
        ];
        let mut executor = StageExecutor::new(tasks, listener.clone());
        executor.start().unwrap();
        executor.join();

        // Both tasks fail at nearly the same instant; exactly one report.
        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
        assert_eq!(listener.finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_is_reported_as_failure() {
        struct PanickingStage;
        impl Stage for PanickingStage {
            fn name(&self) -> &str {
                "panicker"
            }
            fn setup(&mut self) -> Result<()> {
                Ok(())
            }
            fn process_frame(&mut self) -> Result<()> {
                panic!("scripted panic");
            }
            fn release(&mut self) {}
            fn is_done(&self) -> bool {
                false
            }
        }

        let listener = RecordingListener::default();
        let mut task = StageTask::new("task-p").with_frame_interval(Duration::from_millis(1));
        task.add_stage(PanickingStage);
        let mut executor = StageExecutor::new(vec![task], listener.clone());
        executor.start().unwrap();
        executor.join();

        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
        assert_eq!(
            listener.failed_task.lock().unwrap().as_deref(),
            Some("task-p")
        );
    }

    #[test]
    fn test_executor_cancel_stops_endless_tasks() {
        let listener = RecordingListener::default();
        let tasks = vec![
            task_with(ScriptedStage::ok("a", usize::MAX)),
            task_with(ScriptedStage::ok("b", usize::MAX)),
        ];
        let mut executor = StageExecutor::new(tasks, listener.clone());
        executor.start().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        executor.cancel();
        executor.join();

        // Canceled tasks end "successfully": the run was asked to stop.
        assert_eq!(listener.finished.load(Ordering::SeqCst), 1);
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pause_resume_fan_out() {
        let listener = RecordingListener::default();
        let tasks = vec![
            task_with(ScriptedStage::ok("a", 5)),
            task_with(ScriptedStage::ok("b", 5)),
        ];
        let mut executor = StageExecutor::new(tasks, listener.clone());
        executor.pause();
        executor.start().unwrap();

        std::thread::sleep(Duration::from_millis(30));
        // Both tasks sit paused; nothing terminal has fired.
        assert_eq!(listener.finished.load(Ordering::SeqCst), 0);

        executor.resume();
        executor.join();
        assert_eq!(listener.finished.load(Ordering::SeqCst), 1);
    }
}
