//! Mount reference counting.
//!
//! The tracker maps each real layer ID to the number of callers that
//! currently hold it mounted. The map itself sits behind one mutex which is
//! only held to look up, insert, or drop an entry. Each entry carries its own
//! slot lock; state transitions for a layer (and the primitive calls they
//! imply) run under that slot lock, so calls for one layer are serialised
//! while other layers proceed in parallel. An export holds the slot of its
//! layer while it stages content, so a mount or unmount of that layer
//! blocks until staging finishes.
//!
//! An entry exists only while its count is non-zero. When a transition
//! leaves the count at zero the slot is retired and unlinked; a caller that
//! raced for the retired slot retries against a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use strata_common::error::{Result, StrataError};

#[derive(Debug, Default)]
struct Slot {
    count: usize,
    retired: bool,
}

/// Per-instance table of active mount counts.
#[derive(Debug, Default)]
pub struct ActivationTracker {
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl ActivationTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `transition` with exclusive access to the mount count of `id`.
    ///
    /// The closure may read and update the count and call into the layering
    /// primitive; the map lock is not held while it runs. If the count is
    /// zero afterwards, the entry is dropped.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or an error if a lock is poisoned.
    pub fn with_count<T, F>(&self, id: &str, transition: F) -> Result<T>
    where
        F: FnOnce(&mut usize) -> Result<T>,
    {
        loop {
            let slot = self.slot(id)?;
            let mut guard = lock_slot(&slot)?;
            if guard.retired {
                continue;
            }

            let outcome = transition(&mut guard.count);
            if guard.count == 0 {
                guard.retired = true;
                self.unlink(id, &slot)?;
            }
            return outcome;
        }
    }

    /// Returns the current mount count of `id`; absent layers count zero.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn count(&self, id: &str) -> Result<usize> {
        let Some(slot) = self.lock_map()?.get(id).cloned() else {
            return Ok(0);
        };
        let guard = lock_slot(&slot)?;
        Ok(if guard.retired { 0 } else { guard.count })
    }

    #[cfg(test)]
    fn is_tracked(&self, id: &str) -> Result<bool> {
        Ok(self.lock_map()?.contains_key(id))
    }

    /// Returns every tracked layer with its count, sorted by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<(String, usize)>> {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = self
            .lock_map()?
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut active = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            let guard = lock_slot(&slot)?;
            if !guard.retired && guard.count > 0 {
                active.push((id, guard.count));
            }
        }
        active.sort();
        Ok(active)
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<Slot>>> {
        let mut slots = self.lock_map()?;
        Ok(Arc::clone(slots.entry(id.to_string()).or_default()))
    }

    fn unlink(&self, id: &str, slot: &Arc<Mutex<Slot>>) -> Result<()> {
        let mut slots = self.lock_map()?;
        if slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            let _ = slots.remove(id);
        }
        Ok(())
    }

    fn lock_map(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Mutex<Slot>>>>> {
        self.slots.lock().map_err(|_| StrataError::Config {
            message: "mount table lock poisoned".into(),
        })
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> Result<MutexGuard<'_, Slot>> {
    slot.lock().map_err(|_| StrataError::Config {
        message: "layer slot lock poisoned".into(),
    })
}
