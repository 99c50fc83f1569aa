//! # Integration Tests for the Weight Store
//!
//! Cross-module behaviour: persistence across reopen, concurrent saves, and
//! clamping properties of learnable weights.

use crate::models::{LearnableWeight, WeightConfig};
use crate::runtime::RuntimeWeights;
use crate::store::{ConfigSource, WeightStore};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_promoted_default_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.db");

    {
        let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
        let store = WeightStore::open(&path, runtime).unwrap();
        let mut config = WeightConfig::default();
        config.retrieval.alpha.set_value(0.55);
        store.save(config, None, BTreeMap::new()).unwrap();
        store.flush().unwrap();
    }

    let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default()).unwrap());
    let store = WeightStore::open(&path, runtime).unwrap();
    let resolved = store.resolve(None).unwrap();
    assert_eq!(resolved.source, ConfigSource::PersistedDefault);
    assert_eq!(resolved.config.retrieval.alpha.current(), 0.55);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_saves_get_distinct_revisions() {
    let store = Arc::new(WeightStore::temporary().unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let mut config = WeightConfig::default();
                config.retrieval.alpha.set_value(0.4 + i as f64 * 0.01);
                store.save(config, Some("exp"), BTreeMap::new()).unwrap().revision
            })
        })
        .collect();

    let mut revisions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    revisions.sort_unstable();
    assert_eq!(revisions, (1..=8).collect::<Vec<u64>>());

    let latest = store.latest_version(Some("exp")).unwrap().unwrap();
    let resolved = store.resolve(Some("exp")).unwrap();
    assert_eq!(resolved.revision, Some(8));
    assert_eq!(resolved.config.retrieval.alpha, latest.config.retrieval.alpha);
}

#[test]
fn test_reads_never_observe_partial_documents() {
    let store = Arc::new(WeightStore::temporary().unwrap());

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..50 {
                let mut config = WeightConfig::default();
                let value = 0.3 + (i % 10) as f64 * 0.05;
                config.retrieval.alpha.set_value(value);
                config.rlcf.track_record.set_value(value.min(0.6));
                store.save(config, Some("exp"), BTreeMap::new()).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let config = store.get_config(Some("exp")).unwrap();
        assert!(config.validate().is_ok());
        let alpha = config.retrieval.alpha.current();
        let track = config.rlcf.track_record.current();
        if config.retrieval.alpha.value.is_some() {
            assert_eq!(alpha.min(0.6), track);
        }
    }
    writer.join().unwrap();
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Property: a learned value never leaves the bounds.
    #[test]
    fn prop_set_value_stays_in_bounds(
        lower in -10.0f64..10.0,
        width in 0.001f64..10.0,
        position in 0.01f64..0.99,
        candidate in proptest::num::f64::ANY,
    ) {
        let upper = lower + width;
        let default = lower + width * position;
        prop_assume!(lower < default && default < upper);
        let mut weight = LearnableWeight::new(default, lower, upper).unwrap();
        let stored = weight.set_value(candidate);
        prop_assert!(stored >= lower && stored <= upper);
        prop_assert!(weight.validate("w").is_ok());
    }
}
