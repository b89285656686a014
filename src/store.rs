//! Latest-detections store.
//!
//! One exclusive lock guards the current snapshot. `replace` moves a fully
//! built snapshot in, `read` clones it out; neither holds the lock for
//! anything but the swap/copy.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::detect::Detection;

#[derive(Debug, Default)]
pub struct DetectionStore {
    current: Mutex<Vec<Detection>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current snapshot wholesale.
    pub fn replace(&self, snapshot: Vec<Detection>) {
        let previous = {
            let mut guard = self.lock();
            std::mem::replace(&mut *guard, snapshot)
        };
        // The superseded snapshot is freed outside the critical section.
        drop(previous);
    }

    /// Independent copy of the current snapshot.
    pub fn read(&self) -> Vec<Detection> {
        self.lock().clone()
    }

    // A poisoned lock still holds a complete snapshot: the only write is a
    // single move.
    fn lock(&self) -> MutexGuard<'_, Vec<Detection>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
