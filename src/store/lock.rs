use super::LockMode;
use crate::error::AssetError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::error;

#[derive(Default)]
struct LockState {
    writer: Option<ThreadId>,
    readers: HashMap<ThreadId, usize>,
}

/// Single-writer / multi-reader store lock owned by threads rather than guards.
pub(super) struct StoreLock {
    state: Mutex<LockState>,
    cv: Condvar,
    /// Set when the state mutex is found poisoned; the store then refuses
    /// every new transaction.
    poisoned: AtomicBool,
}

impl Default for StoreLock {
    fn default() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cv: Condvar::default(),
            poisoned: AtomicBool::new(false),
        }
    }
}

impl StoreLock {
    /// A thread that already holds the write lock, or holds a read lock and
    /// asks for write, is refused immediately: waiting would deadlock on itself.
    pub(super) fn acquire(
        &self,
        mode: LockMode,
        owner: ThreadId,
        timeout: Duration,
    ) -> Result<(), AssetError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(poisoned_error());
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|_| self.poison())?;

        if state.writer == Some(owner) {
            return Err(AssetError::LockHeldByThread { held: "write" });
        }
        if state.readers.contains_key(&owner) && mode == LockMode::Write {
            return Err(AssetError::LockHeldByThread { held: "read" });
        }

        loop {
            let blocked = match mode {
                LockMode::Read => state.writer.is_some(),
                LockMode::Write => state.writer.is_some() || !state.readers.is_empty(),
            };
            if !blocked {
                match mode {
                    LockMode::Read => *state.readers.entry(owner).or_insert(0) += 1,
                    LockMode::Write => state.writer = Some(owner),
                }
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AssetError::Timeout(format!(
                    "waited {timeout:?} for the store {mode} lock"
                )));
            }
            let (next, wait) = self
                .cv
                .wait_timeout(state, deadline.saturating_duration_since(now))
                .map_err(|_| self.poison())?;
            state = next;
            if wait.timed_out() && Instant::now() >= deadline {
                return Err(AssetError::Timeout(format!(
                    "waited {timeout:?} for the store {mode} lock"
                )));
            }
        }
    }

    pub(super) fn release(&self, mode: LockMode, owner: ThreadId) {
        match self.state.lock() {
            Ok(mut state) => {
                match mode {
                    LockMode::Write => {
                        if state.writer == Some(owner) {
                            state.writer = None;
                        }
                    }
                    LockMode::Read => {
                        if let Some(count) = state.readers.get_mut(&owner) {
                            *count -= 1;
                            if *count == 0 {
                                state.readers.remove(&owner);
                            }
                        }
                    }
                }
                drop(state);
                self.cv.notify_all();
            }
            Err(_) => {
                self.poisoned.store(true, Ordering::Release);
                error!("store lock poisoned during release - refusing new transactions");
            }
        }
    }

    fn poison(&self) -> AssetError {
        self.poisoned.store(true, Ordering::Release);
        error!("store lock poisoned - refusing new transactions");
        poisoned_error()
    }
}

fn poisoned_error() -> AssetError {
    AssetError::Unavailable {
        message: "store lock poisoned".into(),
    }
}
