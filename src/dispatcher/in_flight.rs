use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Source texts with an outstanding remote call.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

/// Holds one in-flight slot; the slot is released when the guard drops,
/// whichever way the request ended.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    source: String,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `source` if no other request holds it and `admit` agrees.
    /// `admit` runs under the set's lock, so check-and-claim is atomic with
    /// respect to other callers.
    pub fn try_claim_with<F>(&self, source: &str, admit: F) -> Claim
    where
        F: FnOnce() -> bool,
    {
        let mut pending = self.lock();
        if pending.contains(source) {
            return Claim::Duplicate;
        }
        if !admit() {
            return Claim::Refused;
        }
        pending.insert(source.to_string());
        Claim::Claimed(InFlightGuard {
            set: self.clone(),
            source: source.to_string(),
        })
    }

    pub fn contains(&self, source: &str) -> bool {
        self.lock().contains(source)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub enum Claim {
    Claimed(InFlightGuard),
    Duplicate,
    Refused,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.source);
    }
}
