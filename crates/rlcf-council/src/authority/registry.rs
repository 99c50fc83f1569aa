//! Per-evaluator locked registry.
//!
//! Scoring feedback for the same evaluator on different tasks is a
//! read-modify-write on the evaluator's authority fields. The registry holds
//! one `Mutex` per evaluator and funnels every mutation through
//! [`EvaluatorRegistry::update`], so concurrent updates to one evaluator are
//! applied one after another while different evaluators proceed in parallel.

use crate::error::CouncilError;
use crate::models::Evaluator;
use crate::Result;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Thread-safe evaluator store.
#[derive(Debug, Default)]
pub struct EvaluatorRegistry {
    evaluators: DashMap<String, Arc<Mutex<Evaluator>>>,
}

impl EvaluatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator. Returns false, keeping the existing record,
    /// if the id is already registered.
    pub fn register(&self, evaluator: Evaluator) -> bool {
        let id = evaluator.id.clone();
        let mut inserted = false;
        self.evaluators.entry(id.clone()).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(evaluator))
        });
        if inserted {
            info!("Registered evaluator {}", id);
        }
        inserted
    }

    /// Returns true if the evaluator is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.evaluators.contains_key(id)
    }

    /// Snapshot of an evaluator.
    pub fn get(&self, id: &str) -> Result<Evaluator> {
        let slot = self.slot(id)?;
        let evaluator = slot
            .lock()
            .map_err(|_| CouncilError::LockPoisoned(id.to_string()))?;
        Ok(evaluator.clone())
    }

    /// Current authority of an evaluator.
    pub fn authority(&self, id: &str) -> Result<f64> {
        Ok(self.get(id)?.authority_score)
    }

    /// Applies `mutate` under the evaluator's lock and bumps its revision.
    ///
    /// # Errors
    ///
    /// Returns `CouncilError::UnknownEvaluator` if the id is not registered.
    pub fn update<F, T>(&self, id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Evaluator) -> T,
    {
        // Clone the slot out so the map shard is not held while mutating.
        let slot = self.slot(id)?;
        let mut evaluator = slot
            .lock()
            .map_err(|_| CouncilError::LockPoisoned(id.to_string()))?;
        let result = mutate(&mut evaluator);
        evaluator.revision += 1;
        Ok(result)
    }

    /// Registered evaluator ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.evaluators.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered evaluators.
    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    /// Returns true if no evaluator is registered.
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<Evaluator>>> {
        self.evaluators
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CouncilError::UnknownEvaluator(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_register_once() {
        let registry = EvaluatorRegistry::new();
        assert!(registry.register(Evaluator::new("e1", Vec::new())));

        let mut duplicate = Evaluator::new("e1", Vec::new());
        duplicate.authority_score = 0.9;
        assert!(!registry.register(duplicate));
        assert_eq!(registry.authority("e1").unwrap(), 0.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_evaluator() {
        let registry = EvaluatorRegistry::new();
        assert!(matches!(
            registry.get("ghost"),
            Err(CouncilError::UnknownEvaluator(_))
        ));
        assert!(registry.update("ghost", |_| ()).is_err());
    }

    #[test]
    fn test_update_bumps_revision() {
        let registry = EvaluatorRegistry::new();
        registry.register(Evaluator::new("e1", Vec::new()));
        let score = registry
            .update("e1", |e| {
                e.authority_score = 0.42;
                e.authority_score
            })
            .unwrap();
        assert_eq!(score, 0.42);
        assert_eq!(registry.get("e1").unwrap().revision, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let registry = Arc::new(EvaluatorRegistry::new());
        registry.register(Evaluator::new("e1", Vec::new()));
        registry.register(Evaluator::new("e2", Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let id = if i % 2 == 0 { "e1" } else { "e2" };
                    for _ in 0..250 {
                        registry
                            .update(id, |e| {
                                let read = e.baseline_credential_score;
                                thread::yield_now();
                                e.baseline_credential_score = read + 1.0;
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in ["e1", "e2"] {
            let evaluator = registry.get(id).unwrap();
            assert_eq!(evaluator.baseline_credential_score, 1000.0);
            assert_eq!(evaluator.revision, 1000);
        }
        assert_eq!(registry.ids(), vec!["e1".to_string(), "e2".to_string()]);
    }
}
