//! Entries this process has claimed and not finished with yet.
//!
//! An entry is held from the moment it is claimed (or reclaimed) until its
//! handler returns, including the time it waits in the worker queue. The
//! consumer heartbeats every held entry so other processes do not see it as
//! stale, and the reclaim loop never takes back an entry its own process
//! still holds.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use courier_core::types::EntryId;

/// Shared set of held entry ids. Clones refer to the same set.
#[derive(Debug, Clone, Default)]
pub struct HeldEntries {
    ids: Arc<Mutex<HashSet<EntryId>>>,
}

impl HeldEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start holding `id`. Returns `false` if it was already held.
    pub fn hold(&self, id: EntryId) -> bool {
        self.lock().insert(id)
    }

    pub fn release(&self, id: EntryId) {
        self.lock().remove(&id);
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Held ids in ascending order.
    pub fn snapshot(&self) -> Vec<EntryId> {
        let mut ids: Vec<_> = self.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Release `id` when the returned guard is dropped, even if the task
    /// owning it is aborted.
    pub fn release_on_drop(&self, id: EntryId) -> ReleaseGuard {
        ReleaseGuard {
            held: self.clone(),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<EntryId>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases one held entry on drop.
#[derive(Debug)]
pub struct ReleaseGuard {
    held: HeldEntries,
    id: EntryId,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.held.release(self.id);
    }
}
