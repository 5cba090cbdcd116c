//! Synthesis engine cache
//!
//! Synthesis engines are expensive to build (model loading) and cheap to reuse, so
//! they are kept per model key and released once they have been idle for longer
//! than the configured TTL.
//!
//! # Locking
//!
//! - The key map sits behind an async `RwLock`. It is held only to look up,
//!   insert or remove a per-key slot, never while an engine is being built.
//! - Each slot publishes its entry through a `OnceCell`. The first caller spawns
//!   the build as its own task and stores a shared handle to it; concurrent
//!   callers for the same key await that handle instead of starting their own.
//!   A dropped caller does not stop the build. A failed build leaves the cell
//!   empty, so the next request retries.
//! - Each entry guards its engine with its own `Mutex`. `generate` calls on one
//!   engine are serialized; eviction takes the engine out under the same lock.
//!
//! # Expiry
//!
//! An entry is expired when `now - last_access > ttl`. Lookups refresh
//! `last_access` (sliding window). The same predicate drives the lazy path
//! (a lookup finding an expired entry rebuilds it) and the periodic sweep.
//! An entry whose engine is busy generating is never considered idle.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::engines::{EngineError, GeneratedAudio, ModelConfig, SynthesisEngine, SynthesisEngineFactory};
use crate::metrics::Metrics;

/// Identifies a synthesis model by the path of its configuration document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey(PathBuf);

impl ModelKey {
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        Self(config_path.into())
    }

    pub fn config_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Engine cache error types
///
/// Cloneable so one build outcome can be handed to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The configuration document does not exist
    #[error("Model configuration not found: {0}")]
    ConfigNotFound(String),
    /// The configuration document exists but cannot be read
    #[error("Cannot read model configuration {key}: {source}")]
    ConfigIo {
        key: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The configuration document is not a valid model configuration
    #[error("Malformed model configuration {key}: {reason}")]
    ConfigMalformed { key: String, reason: String },
    /// The engine factory failed; nothing was cached
    #[error("Failed to construct engine for {key}: {source}")]
    Construction {
        key: String,
        #[source]
        source: Arc<EngineError>,
    },
    /// The engine was released between lookup and use
    #[error("Engine for {0} was evicted before use")]
    Evicted(String),
    /// Inference failed
    #[error("Generation failed: {0}")]
    Generation(#[source] Arc<EngineError>),
    /// A blocking task panicked or was cancelled
    #[error("Engine task failed: {0}")]
    TaskFailed(String),
}

/// Shared expiry predicate for lazy and periodic eviction
pub fn is_expired(last_access: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(last_access) > ttl
}

type EngineSlot = Option<Box<dyn SynthesisEngine>>;

/// A constructed engine and its bookkeeping
pub struct CacheEntry {
    key: ModelKey,
    engine: Arc<Mutex<EngineSlot>>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_access: StdMutex<Instant>,
    ttl: Duration,
}

impl CacheEntry {
    fn new(key: ModelKey, engine: Box<dyn SynthesisEngine>, ttl: Duration) -> Self {
        Self {
            key,
            engine: Arc::new(Mutex::new(Some(engine))),
            created_at: chrono::Utc::now(),
            last_access: StdMutex::new(Instant::now()),
            ttl,
        }
    }

    fn last_access_guard(&self) -> MutexGuard<'_, Instant> {
        // An Instant cannot be left half-written, a poisoned lock is still usable
        self.last_access
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        *self.last_access_guard() = Instant::now();
    }

    fn last_access(&self) -> Instant {
        *self.last_access_guard()
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        is_expired(self.last_access(), now, self.ttl)
    }

    /// Release the engine unless it is in use. Returns false when busy.
    fn try_release(&self) -> bool {
        match self.engine.try_lock() {
            Ok(mut slot) => {
                if let Some(engine) = slot.take() {
                    drop(engine);
                    debug!("Released engine for {}", self.key);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Release the engine, waiting for an in-flight generation to finish
    async fn release(&self) {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.take() {
            drop(engine);
            debug!("Released engine for {}", self.key);
        }
    }
}

/// Per-request access to a cached engine
#[derive(Clone)]
pub struct EngineHandle {
    entry: Arc<CacheEntry>,
}

impl EngineHandle {
    pub fn key(&self) -> &ModelKey {
        &self.entry.key
    }

    /// Run one synthesis, serialized with every other call on the same engine
    ///
    /// The engine lock is held by this future: dropping it (client disconnect)
    /// cancels the synthesis and frees the engine for the next request.
    pub async fn generate(
        &self,
        text: String,
        speed: f32,
        voice: u32,
    ) -> Result<GeneratedAudio, CacheError> {
        let mut slot = self.entry.engine.lock().await;
        let engine = slot
            .as_mut()
            .ok_or_else(|| CacheError::Evicted(self.entry.key.to_string()))?;
        self.entry.touch();

        let result = engine
            .generate(&text, speed, voice)
            .await
            .map_err(|e| CacheError::Generation(Arc::new(e)));

        self.entry.touch();
        result
    }
}

/// Status view of one cache entry
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub key: String,
    /// RFC 3339 construction time
    pub created_at: String,
    pub idle_seconds: u64,
    /// Whether a generation is running right now
    pub busy: bool,
}

type SharedBuild = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, CacheError>>>;

/// Per-key slot: the published entry, or the build that will produce it
#[derive(Default)]
struct Slot {
    entry: OnceCell<Arc<CacheEntry>>,
    build: StdMutex<Option<SharedBuild>>,
}

impl Slot {
    fn get(&self) -> Option<&Arc<CacheEntry>> {
        self.entry.get()
    }

    fn initialized(&self) -> bool {
        self.entry.initialized()
    }

    fn build_guard(&self) -> MutexGuard<'_, Option<SharedBuild>> {
        self.build
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Lookup {
    Ready(Arc<CacheEntry>),
    Pending(SharedBuild),
}

type SlotMap = Arc<RwLock<HashMap<ModelKey, Arc<Slot>>>>;

/// Everything a detached build task needs
#[derive(Clone)]
struct Builder {
    factory: Arc<dyn SynthesisEngineFactory>,
    ttl: Duration,
    slots: SlotMap,
    metrics: Metrics,
}

impl Builder {
    /// Build the engine for `key` and publish it in `slot`
    ///
    /// Runs in its own task, so a caller that goes away never abandons a
    /// construction half-way and never causes a second one.
    async fn run(self, key: ModelKey, slot: Arc<Slot>) -> Result<Arc<CacheEntry>, CacheError> {
        let result = self.construct(&key).await;
        {
            let mut build = slot.build_guard();
            if let Ok(entry) = &result {
                if slot.entry.set(Arc::clone(entry)).is_err() {
                    warn!("Engine for {} was already published", key);
                }
            }
            *build = None;
        }

        if result.is_ok() {
            let count = {
                let slots = self.slots.read().await;
                slots.values().filter(|slot| slot.initialized()).count()
            };
            self.metrics.set_cached_engines(count).await;
        }
        result
    }

    /// Read the configuration document and build the engine off the async runtime
    async fn construct(&self, key: &ModelKey) -> Result<Arc<CacheEntry>, CacheError> {
        let started = std::time::Instant::now();
        let path = key.config_path();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Model configuration not found: {}", key);
                return Err(CacheError::ConfigNotFound(key.to_string()));
            }
            Err(source) => {
                return Err(CacheError::ConfigIo {
                    key: key.to_string(),
                    source: Arc::new(source),
                })
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = ModelConfig::from_json(&content, base_dir).map_err(|e| {
            warn!("Malformed model configuration {}: {}", key, e);
            CacheError::ConfigMalformed {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;

        info!("Constructing synthesis engine for {}", key);
        let factory = Arc::clone(&self.factory);
        let built = tokio::task::spawn_blocking(move || factory.build(&config))
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?;
        let duration = started.elapsed().as_secs_f64();

        match built {
            Ok(engine) => {
                info!("Engine for {} ready in {:.2}s", key, duration);
                self.metrics
                    .record_engine_construction("success", duration)
                    .await;
                Ok(Arc::new(CacheEntry::new(key.clone(), engine, self.ttl)))
            }
            Err(source) => {
                error!("Failed to construct engine for {}: {}", key, source);
                self.metrics
                    .record_engine_construction("failed", duration)
                    .await;
                Err(CacheError::Construction {
                    key: key.to_string(),
                    source: Arc::new(source),
                })
            }
        }
    }
}

/// Keyed cache of synthesis engines with sliding TTL eviction
pub struct EngineCache {
    builder: Builder,
    ttl: Duration,
    slots: SlotMap,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
}

impl EngineCache {
    pub fn new(factory: Arc<dyn SynthesisEngineFactory>, ttl: Duration, metrics: Metrics) -> Self {
        let slots: SlotMap = Arc::new(RwLock::new(HashMap::new()));
        Self {
            builder: Builder {
                factory,
                ttl,
                slots: Arc::clone(&slots),
                metrics: metrics.clone(),
            },
            ttl,
            slots,
            sweeper: StdMutex::new(None),
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the engine for `key`, building it on first use or after expiry
    ///
    /// Concurrent callers for the same key share one construction, which runs
    /// in a detached task and completes even if every caller is dropped.
    /// Configuration and construction errors are returned to every caller
    /// waiting on that build and leave no entry behind.
    pub async fn get_or_create(&self, key: &ModelKey) -> Result<EngineHandle, CacheError> {
        let slot = self.slot_for(key).await;
        let entry = match self.lookup(key, &slot) {
            Lookup::Ready(entry) => entry,
            Lookup::Pending(build) => build.await?,
        };
        Ok(EngineHandle { entry })
    }

    /// The published entry, or the build to wait on, starting one if none runs
    fn lookup(&self, key: &ModelKey, slot: &Arc<Slot>) -> Lookup {
        let mut build = slot.build_guard();
        if let Some(entry) = slot.get() {
            return Lookup::Ready(Arc::clone(entry));
        }
        if let Some(running) = build.as_ref() {
            return Lookup::Pending(running.clone());
        }

        let task = tokio::spawn(self.builder.clone().run(key.clone(), Arc::clone(slot)));
        let shared = task
            .map(|joined| joined.unwrap_or_else(|e| Err(CacheError::TaskFailed(e.to_string()))))
            .boxed()
            .shared();
        *build = Some(shared.clone());
        Lookup::Pending(shared)
    }

    /// Find the live slot for `key`, replacing an expired one
    async fn slot_for(&self, key: &ModelKey) -> Arc<Slot> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                match slot.get() {
                    Some(entry) if !entry.is_expired_at(Instant::now()) => {
                        // Touch under the map lock so a sweep cannot slip in between
                        entry.touch();
                        return Arc::clone(slot);
                    }
                    // Build pending, or the last build failed and will be retried
                    None => return Arc::clone(slot),
                    Some(_) => {}
                }
            }
        }

        let mut slots = self.slots.write().await;
        let mut expired = false;
        if let Some(slot) = slots.get(key) {
            match slot.get() {
                Some(entry) if entry.is_expired_at(Instant::now()) => {
                    if entry.try_release() {
                        info!("Engine for {} idle for over {:?}, rebuilding", key, self.ttl);
                        expired = true;
                    } else {
                        // Generating right now, so not idle
                        entry.touch();
                        return Arc::clone(slot);
                    }
                }
                Some(entry) => {
                    entry.touch();
                    return Arc::clone(slot);
                }
                None => return Arc::clone(slot),
            }
        }

        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), Arc::clone(&slot));
        drop(slots);

        if expired {
            self.metrics.record_engine_eviction("lazy").await;
        }
        slot
    }

    /// Release every idle entry past its TTL; returns how many were evicted
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        let remaining = {
            let mut slots = self.slots.write().await;
            slots.retain(|key, slot| match slot.get() {
                Some(entry) if entry.is_expired_at(now) => {
                    if entry.try_release() {
                        info!("Evicted idle engine for {}", key);
                        evicted += 1;
                        false
                    } else {
                        true
                    }
                }
                Some(_) => true,
                // Empty slot left by a failed build that nobody is retrying
                None => Arc::strong_count(slot) > 1,
            });
            slots.values().filter(|slot| slot.initialized()).count()
        };

        for _ in 0..evicted {
            self.metrics.record_engine_eviction("expired").await;
        }
        self.metrics.set_cached_engines(remaining).await;
        evicted
    }

    /// Start the periodic sweep; replaces a previously started one
    pub fn start_eviction_task(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::downgrade(self);
        info!(
            "Starting engine eviction task: ttl {:?}, interval {:?}",
            self.ttl, interval
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let count = cache.evict_expired().await;
                if count > 0 {
                    info!("Evicted {} idle engine(s)", count);
                } else {
                    debug!("No idle engines to evict");
                }
            }
        });

        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = sweeper.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sweep and release every engine
    ///
    /// Waits for in-flight generations; the cache is empty afterwards.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
        }

        let mut slots = self.slots.write().await;
        for (key, slot) in slots.iter() {
            if let Some(entry) = slot.get() {
                entry.release().await;
                info!("Released engine for {}", key);
            }
        }
        slots.clear();
        drop(slots);

        self.metrics.set_cached_engines(0).await;
    }

    /// Number of constructed engines currently cached
    pub async fn len(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Describe the cached engines
    pub async fn snapshot(&self) -> Vec<EngineInfo> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        let mut infos: Vec<EngineInfo> = slots
            .values()
            .filter_map(|slot| slot.get())
            .map(|entry| EngineInfo {
                key: entry.key.to_string(),
                created_at: entry.created_at.to_rfc3339(),
                idle_seconds: now.saturating_duration_since(entry.last_access()).as_secs(),
                busy: entry.engine.try_lock().is_err(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}
