//! One-shot stage holders for the lazy resource chain.
//!
//! A `Stage<T>` is constructed at most once. Concurrent callers wait for the
//! initializing thread; a failed or panicking initializer leaves the stage
//! failed for good and every later request reports `StageFailed`.

use crate::CoreError;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Uninitialized => write!(f, "uninitialized"),
            StageState::Initializing => write!(f, "initializing"),
            StageState::Ready => write!(f, "ready"),
            StageState::Failed => write!(f, "failed"),
        }
    }
}

enum Slot {
    Idle,
    Initializing(ThreadId),
    Failed(String),
}

pub struct Stage<T> {
    name: &'static str,
    slot: Mutex<Slot>,
    settled: Condvar,
    value: OnceLock<Arc<T>>,
}

impl<T> Stage<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Idle),
            settled: Condvar::new(),
            value: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> StageState {
        if self.value.get().is_some() {
            return StageState::Ready;
        }
        match *self.lock() {
            Slot::Idle => StageState::Uninitialized,
            Slot::Initializing(_) => StageState::Initializing,
            Slot::Failed(_) => StageState::Failed,
        }
    }

    /// The value if the stage is ready. Never initializes.
    pub fn get(&self) -> Option<&Arc<T>> {
        self.value.get()
    }

    /// Like [`get`](Self::get), but a failed stage is an error.
    pub fn settled(&self) -> Result<Option<&Arc<T>>, CoreError> {
        if let Some(value) = self.value.get() {
            return Ok(Some(value));
        }
        match &*self.lock() {
            Slot::Failed(reason) => Err(self.failed(reason)),
            _ => Ok(None),
        }
    }

    /// Return the value, running `init` if nobody has yet.
    ///
    /// Only the first caller runs `init`; others block until it settles. The
    /// first caller sees the initializer's own error, later callers get
    /// `StageFailed`. Calling back into the same stage from inside `init` is
    /// `Reentrant`.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<&Arc<T>, CoreError>
    where
        F: FnOnce() -> Result<T, CoreError>,
    {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }

        let me = thread::current().id();
        let mut slot = self.lock();
        loop {
            if let Some(value) = self.value.get() {
                return Ok(value);
            }
            match &*slot {
                Slot::Idle => break,
                Slot::Failed(reason) => return Err(self.failed(reason)),
                Slot::Initializing(owner) if *owner == me => {
                    return Err(CoreError::Reentrant(self.name));
                }
                Slot::Initializing(_) => {}
            }
            slot = self
                .settled
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *slot = Slot::Initializing(me);
        drop(slot);

        debug!("initializing {} stage", self.name);
        let mut guard = PanicGuard {
            stage: self,
            armed: true,
        };
        let result = init();
        guard.armed = false;

        let mut slot = self.lock();
        let outcome = match result {
            Ok(value) => {
                *slot = Slot::Idle;
                Ok(self.value.get_or_init(|| Arc::new(value)))
            }
            Err(e) => {
                debug!("{} stage failed: {e}", self.name);
                *slot = Slot::Failed(e.to_string());
                Err(e)
            }
        };
        drop(slot);
        self.settled.notify_all();
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failed(&self, reason: &str) -> CoreError {
        CoreError::StageFailed {
            stage: self.name,
            reason: reason.to_owned(),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Marks the stage failed if the initializer unwinds.
struct PanicGuard<'a, T> {
    stage: &'a Stage<T>,
    armed: bool,
}

impl<T> Drop for PanicGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            *self.stage.lock() = Slot::Failed("initializer panicked".to_owned());
            self.stage.settled.notify_all();
        }
    }
}
