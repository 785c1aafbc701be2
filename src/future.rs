//! Single-assignment value cell with blocking readers.

use crate::error::{Error, Result};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A single-assignment, multi-read value cell.
///
/// Used to hand configuration discovered mid-pipeline (the negotiated
/// output format of an encoder) to a downstream consumer without polling.
/// The writer calls [`set`](Self::set) at most once; any number of readers
/// block in [`get`](Self::get) or [`get_timeout`](Self::get_timeout) until
/// the value lands, after which every read returns immediately.
///
/// The semantics are deliberately narrow: single write, many reads. This
/// is a tagged `Empty | Set(value)` cell behind a mutex/condvar pair, not
/// a general task future.
pub struct OneShotCell<T> {
    /// What the value is called in timeout errors, e.g. `"output format"`.
    what: &'static str,
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> OneShotCell<T> {
    /// Create an empty cell. `what` names the awaited value in errors.
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store the value and wake every waiting reader.
    ///
    /// A second `set` is a consistency violation: the first value stays,
    /// and the caller gets an error.
    pub fn set(&self, value: T) -> Result<()> {
        let mut slot = self.value.lock().unwrap();
        if slot.is_some() {
            return Err(Error::Consistency(format!("{} already set", self.what)));
        }
        *slot = Some(value);
        self.ready.notify_all();
        Ok(())
    }

    /// Block until the value is set, then return a clone of it.
    pub fn get(&self) -> T {
        let mut slot = self.value.lock().unwrap();
        while slot.is_none() {
            slot = self.ready.wait(slot).unwrap();
        }
        slot.as_ref().cloned().unwrap()
    }

    /// Block up to `timeout` for the value.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let mut slot = self.value.lock().unwrap();
        while slot.is_none() {
            let (guard, wait) = self.ready.wait_timeout(slot, timeout).unwrap();
            slot = guard;
            if wait.timed_out() && slot.is_none() {
                return Err(Error::Timeout(self.what));
            }
        }
        Ok(slot.as_ref().cloned().unwrap())
    }

    /// Non-blocking read.
    pub fn try_get(&self) -> Option<T> {
        self.value.lock().unwrap().as_ref().cloned()
    }

    /// True once the value has been set.
    pub fn is_set(&self) -> bool {
        self.value.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_then_get() {
        let cell = OneShotCell::new("answer");
        cell.set(42u32).unwrap();
        assert_eq!(cell.get(), 42);
        assert_eq!(cell.get(), 42); // reads repeat
        assert!(cell.is_set());
    }

    #[test]
    fn test_double_set_is_rejected() {
        let cell = OneShotCell::new("answer");
        cell.set(1u32).unwrap();
        let err = cell.set(2).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(cell.get(), 1);
    }

    #[test]
    fn test_get_blocks_until_set() {
        let cell = Arc::new(OneShotCell::new("late value"));
        let reader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.get())
        };
        thread::sleep(Duration::from_millis(20));
        cell.set(String::from("here")).unwrap();
        assert_eq!(reader.join().unwrap(), "here");
    }

    #[test]
    fn test_get_timeout_expires() {
        let cell: OneShotCell<u32> = OneShotCell::new("never");
        let err = cell.get_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout("never")));
    }

    #[test]
    fn test_get_timeout_succeeds_when_set() {
        let cell = OneShotCell::new("value");
        cell.set(7u32).unwrap();
        assert_eq!(cell.get_timeout(Duration::from_millis(1)).unwrap(), 7);
        assert_eq!(cell.try_get(), Some(7));
    }
}
