//! # Process-Wide Runtime Weights
//!
//! Explicit, documented process state for the weight document: a static
//! default installed by [`RuntimeWeights::init`] and an optional runtime
//! override installed by [`RuntimeWeights::reload`]. Nothing else mutates it.
//!
//! Subscribers registered with [`RuntimeWeights::subscribe`] are notified
//! synchronously, on the reloading thread, after the new document is visible.
//! Every mutation bumps a generation counter, which readers (such as the
//! [`WeightStore`](crate::WeightStore) cache) use to detect staleness.
//!
//! ## Example
//!
//! ```rust
//! use rlcf_weights::{RuntimeWeights, WeightConfig};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let runtime = RuntimeWeights::new(WeightConfig::default()).unwrap();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! runtime.subscribe(move |_event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }).unwrap();
//!
//! let mut tuned = WeightConfig::default();
//! tuned.retrieval.alpha.set_value(0.8);
//! runtime.reload(tuned).unwrap();
//!
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! assert_eq!(runtime.effective().unwrap().retrieval.alpha.current(), 0.8);
//! ```

use crate::models::{Result, WeightConfig, WeightError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, info};

/// What kind of change a subscriber is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// A new static default was installed.
    Init,
    /// A runtime override was installed.
    Reload,
    /// The runtime override was removed.
    ClearOverride,
}

/// Notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// The kind of change.
    pub kind: ReloadKind,
    /// Generation after the change.
    pub generation: u64,
    /// The document now in effect.
    pub effective: Arc<WeightConfig>,
}

/// Handle returned by [`RuntimeWeights::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&ReloadEvent) + Send + Sync>;

/// Process-wide weight state with an `init()`/`reload()` surface.
pub struct RuntimeWeights {
    static_default: RwLock<Arc<WeightConfig>>,
    runtime_override: RwLock<Option<Arc<WeightConfig>>>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    generation: AtomicU64,
    next_subscription: AtomicU64,
}

impl RuntimeWeights {
    /// Creates runtime state around a validated static default.
    pub fn new(static_default: WeightConfig) -> Result<Self> {
        static_default.validate()?;
        Ok(Self::unchecked(static_default))
    }

    fn unchecked(static_default: WeightConfig) -> Self {
        Self {
            static_default: RwLock::new(Arc::new(static_default)),
            runtime_override: RwLock::new(None),
            subscribers: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Installs a new static default and drops any runtime override.
    pub fn init(&self, static_default: WeightConfig) -> Result<u64> {
        static_default.validate()?;
        *self
            .static_default
            .write()
            .map_err(|_| WeightError::LockPoisoned)? = Arc::new(static_default);
        *self
            .runtime_override
            .write()
            .map_err(|_| WeightError::LockPoisoned)? = None;
        info!("Runtime weights initialized");
        self.publish(ReloadKind::Init)
    }

    /// Installs a validated runtime override.
    ///
    /// Returns the new generation.
    pub fn reload(&self, config: WeightConfig) -> Result<u64> {
        config.validate()?;
        *self
            .runtime_override
            .write()
            .map_err(|_| WeightError::LockPoisoned)? = Some(Arc::new(config));
        info!("Runtime weight override reloaded");
        self.publish(ReloadKind::Reload)
    }

    /// Removes the runtime override, falling back to the static default.
    pub fn clear_override(&self) -> Result<u64> {
        *self
            .runtime_override
            .write()
            .map_err(|_| WeightError::LockPoisoned)? = None;
        self.publish(ReloadKind::ClearOverride)
    }

    /// The static default document.
    pub fn static_default(&self) -> Result<Arc<WeightConfig>> {
        Ok(self
            .static_default
            .read()
            .map_err(|_| WeightError::LockPoisoned)?
            .clone())
    }

    /// The runtime override, if one is installed.
    pub fn runtime_override(&self) -> Result<Option<Arc<WeightConfig>>> {
        Ok(self
            .runtime_override
            .read()
            .map_err(|_| WeightError::LockPoisoned)?
            .clone())
    }

    /// The override if present, else the static default.
    pub fn effective(&self) -> Result<Arc<WeightConfig>> {
        match self.runtime_override()? {
            Some(config) => Ok(config),
            None => self.static_default(),
        }
    }

    /// Current generation; bumped by every init, reload and clear.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Registers a callback run synchronously after every change.
    ///
    /// Callbacks must not subscribe or unsubscribe from inside the callback.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&ReloadEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .map_err(|_| WeightError::LockPoisoned)?
            .push((id, Box::new(callback)));
        Ok(id)
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut subscribers = self
            .subscribers
            .write()
            .map_err(|_| WeightError::LockPoisoned)?;
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        Ok(subscribers.len() != before)
    }

    fn publish(&self, kind: ReloadKind) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ReloadEvent {
            kind,
            generation,
            effective: self.effective()?,
        };
        let subscribers = self
            .subscribers
            .read()
            .map_err(|_| WeightError::LockPoisoned)?;
        debug!(
            "Notifying {} subscribers of {:?} (generation {})",
            subscribers.len(),
            kind,
            generation
        );
        for (_, callback) in subscribers.iter() {
            callback(&event);
        }
        Ok(generation)
    }
}

impl std::fmt::Debug for RuntimeWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeWeights")
            .field("generation", &self.generation())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<RuntimeWeights>> = OnceLock::new();

/// The process-wide runtime weights, created from the static default on first use.
pub fn global() -> Arc<RuntimeWeights> {
    GLOBAL
        .get_or_init(|| Arc::new(RuntimeWeights::unchecked(WeightConfig::default())))
        .clone()
}
