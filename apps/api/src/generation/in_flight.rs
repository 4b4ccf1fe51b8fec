//! Per-(learner, course) mutual exclusion for regeneration.
//!
//! A pair is claimed for the lifetime of an `InFlightGuard`; dropping the guard
//! releases it on every exit path, including errors and panics.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

type Pair = (String, String);

#[derive(Clone, Default)]
pub struct InFlightRegistry {
    active: Arc<Mutex<HashSet<Pair>>>,
}

pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Pair>>>,
    key: Pair,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pair, or returns `None` if a regeneration already holds it.
    pub fn try_acquire(&self, learner_id: &str, course_id: &str) -> Option<InFlightGuard> {
        let key = (learner_id.to_string(), course_id.to_string());
        if !self.active.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, learner_id: &str, course_id: &str) -> bool {
        self.active
            .lock()
            .contains(&(learner_id.to_string(), course_id.to_string()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_release() {
        let registry = InFlightRegistry::new();
        let guard = registry.try_acquire("e1", "c1").unwrap();
        assert!(registry.try_acquire("e1", "c1").is_none());
        assert!(registry.is_active("e1", "c1"));

        drop(guard);
        assert!(!registry.is_active("e1", "c1"));
        assert!(registry.try_acquire("e1", "c1").is_some());
    }

    #[test]
    fn test_pairs_are_independent() {
        let registry = InFlightRegistry::new();
        let _a = registry.try_acquire("e1", "c1").unwrap();
        assert!(registry.try_acquire("e1", "c2").is_some());
        assert!(registry.try_acquire("e2", "c1").is_some());
    }
}
