//! # Weight Store - Main Facade
//!
//! Resolves the weight document in effect for a caller and persists new
//! versions. Coordinates the sled [`Storage`], the process-wide
//! [`RuntimeWeights`] and an in-process resolution cache.
//!
//! ## Resolution Precedence
//!
//! | Rank | Source | Applies when |
//! |------|--------|--------------|
//! | 1 | Experiment-persisted version | an experiment id is given and has versions |
//! | 2 | Runtime override | [`RuntimeWeights::reload`] installed one |
//! | 3 | Persisted default | an experiment winner was promoted |
//! | 4 | Static default | always |
//!
//! ## Consistency
//!
//! Cache fills and saves both run under the cache write lock, so a read that
//! starts after `save` returns always observes the saved version. Cache entries
//! are stamped with the runtime generation; a reload makes them stale without
//! any explicit invalidation.

use crate::canonicalize::config_fingerprint;
use crate::models::{CategoryWeights, Result, WeightCategory, WeightConfig, WeightError};
use crate::runtime::RuntimeWeights;
use crate::storage::{Scope, Storage, WeightVersion};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Where a resolved document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Latest version persisted under the requested experiment.
    Experiment,
    /// Process-wide runtime override.
    RuntimeOverride,
    /// Latest promoted default.
    PersistedDefault,
    /// The static default document.
    StaticDefault,
}

/// A resolved weight document and its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The document.
    pub config: Arc<WeightConfig>,
    /// Which precedence level supplied it.
    pub source: ConfigSource,
    /// Persisted revision, when the source is persisted.
    pub revision: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedConfig {
    generation: u64,
    resolved: ResolvedConfig,
}

/// Versioned, cached access to weight documents.
///
/// # Thread Safety
///
/// `WeightStore` is `Send + Sync`; share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use rlcf_weights::{WeightCategory, WeightStore, CategoryWeights};
/// use std::collections::BTreeMap;
///
/// let store = WeightStore::temporary().unwrap();
///
/// let mut tuned = (*store.get_config(Some("exp-1")).unwrap()).clone();
/// tuned.retrieval.alpha.set_value(0.75);
/// store.save(tuned, Some("exp-1"), BTreeMap::from([("ndcg".to_string(), 0.81)])).unwrap();
///
/// match store.get(WeightCategory::Retrieval, Some("exp-1")).unwrap() {
///     CategoryWeights::Retrieval(r) => assert_eq!(r.alpha.current(), 0.75),
///     _ => unreachable!(),
/// }
/// // Other callers still see the default.
/// assert_eq!(store.get_config(None).unwrap().retrieval.alpha.current(), 0.7);
/// ```
pub struct WeightStore {
    /// Persistent version storage.
    storage: Storage,

    /// Runtime override and static default.
    runtime: Arc<RuntimeWeights>,

    /// Resolutions keyed by scope.
    cache: RwLock<HashMap<Scope, CachedConfig>>,
}

impl WeightStore {
    /// Opens a store on disk, resolving through the given runtime state.
    pub fn open<P: AsRef<Path>>(path: P, runtime: Arc<RuntimeWeights>) -> Result<Self> {
        Ok(Self::with_storage(Storage::open(path)?, runtime))
    }

    /// Creates an in-memory store with its own runtime state.
    pub fn temporary() -> Result<Self> {
        let runtime = Arc::new(RuntimeWeights::new(WeightConfig::default())?);
        Ok(Self::with_storage(Storage::temporary()?, runtime))
    }

    /// Builds a store from existing parts.
    pub fn with_storage(storage: Storage, runtime: Arc<RuntimeWeights>) -> Self {
        Self {
            storage,
            runtime,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The runtime state this store resolves through.
    pub fn runtime(&self) -> &Arc<RuntimeWeights> {
        &self.runtime
    }

    /// Resolves the document in effect for an optional experiment.
    pub fn resolve(&self, experiment_id: Option<&str>) -> Result<ResolvedConfig> {
        let scope = Scope::from_experiment(experiment_id);
        let generation = self.runtime.generation();

        {
            let cache = self.cache.read().map_err(|_| WeightError::LockPoisoned)?;
            if let Some(entry) = cache.get(&scope) {
                if entry.generation == generation {
                    return Ok(entry.resolved.clone());
                }
            }
        }

        let mut cache = self.cache.write().map_err(|_| WeightError::LockPoisoned)?;
        if let Some(entry) = cache.get(&scope) {
            if entry.generation == generation {
                return Ok(entry.resolved.clone());
            }
        }

        let resolved = self.resolve_uncached(&scope)?;
        debug!("Resolved weights for {} from {:?}", scope, resolved.source);
        cache.insert(
            scope,
            CachedConfig {
                generation,
                resolved: resolved.clone(),
            },
        );
        Ok(resolved)
    }

    fn resolve_uncached(&self, scope: &Scope) -> Result<ResolvedConfig> {
        if let Scope::Experiment(_) = scope {
            if let Some(version) = self.storage.latest(scope)? {
                return Ok(ResolvedConfig {
                    config: Arc::new(version.config),
                    source: ConfigSource::Experiment,
                    revision: Some(version.revision),
                });
            }
        }

        if let Some(config) = self.runtime.runtime_override()? {
            return Ok(ResolvedConfig {
                config,
                source: ConfigSource::RuntimeOverride,
                revision: None,
            });
        }

        if let Some(version) = self.storage.latest(&Scope::Default)? {
            return Ok(ResolvedConfig {
                config: Arc::new(version.config),
                source: ConfigSource::PersistedDefault,
                revision: Some(version.revision),
            });
        }

        Ok(ResolvedConfig {
            config: self.runtime.static_default()?,
            source: ConfigSource::StaticDefault,
            revision: None,
        })
    }

    /// The full document in effect for an optional experiment.
    pub fn get_config(&self, experiment_id: Option<&str>) -> Result<Arc<WeightConfig>> {
        Ok(self.resolve(experiment_id)?.config)
    }

    /// One category of the document in effect for an optional experiment.
    pub fn get(
        &self,
        category: WeightCategory,
        experiment_id: Option<&str>,
    ) -> Result<CategoryWeights> {
        Ok(self.resolve(experiment_id)?.config.category(category))
    }

    /// Persists a new version and invalidates cached resolutions.
    ///
    /// Saving with no experiment id writes the persisted default, which every
    /// experiment without its own versions falls back to, so the whole cache
    /// is dropped in that case.
    ///
    /// # Errors
    ///
    /// Returns a validation error (nothing is written) if the document
    /// violates its invariants or the experiment id contains NUL.
    pub fn save(
        &self,
        config: WeightConfig,
        experiment_id: Option<&str>,
        metrics: BTreeMap<String, f64>,
    ) -> Result<WeightVersion> {
        let scope = Scope::from_experiment(experiment_id);
        scope.validate()?;
        config.validate()?;
        let fingerprint = config_fingerprint(&config)?;

        let mut cache = self.cache.write().map_err(|_| WeightError::LockPoisoned)?;
        let version = WeightVersion {
            revision: self.storage.next_revision(&scope)?,
            scope: scope.clone(),
            config,
            metrics,
            fingerprint,
            saved_at: Utc::now(),
        };
        self.storage.append(&version)?;

        match &scope {
            Scope::Default => cache.clear(),
            Scope::Experiment(_) => {
                cache.remove(&scope);
            }
        }

        info!(
            "Saved weights revision {} for {} ({})",
            version.revision,
            version.scope,
            &version.fingerprint[..12]
        );
        Ok(version)
    }

    /// All persisted versions for an optional experiment, oldest first.
    pub fn history(&self, experiment_id: Option<&str>) -> Result<Vec<WeightVersion>> {
        self.storage.history(&Scope::from_experiment(experiment_id))
    }

    /// Latest persisted version for an optional experiment.
    pub fn latest_version(&self, experiment_id: Option<&str>) -> Result<Option<WeightVersion>> {
        self.storage.latest(&Scope::from_experiment(experiment_id))
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<usize> {
        self.storage.flush()
    }
}

impl std::fmt::Debug for WeightStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightStore")
            .field("storage", &self.storage)
            .field("runtime", &self.runtime)
            .finish()
    }
}
