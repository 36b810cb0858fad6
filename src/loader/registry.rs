use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::types::{LoadError, ModuleState, ModuleValue};

type LoaderFuture = Pin<Box<dyn Future<Output = anyhow::Result<ModuleValue>> + Send>>;
type LoaderFn = Arc<dyn Fn() -> LoaderFuture + Send + Sync>;
type LoadOutcome = Result<ModuleValue, LoadError>;

/// Loads optional modules on first use and memoizes them.
///
/// Concurrent requests for a module that is still loading share the one
/// in-flight load. Failures are not cached: the next request loads again.
#[derive(Clone, Default)]
pub struct LazyLoader {
    cache: Arc<Mutex<Cache>>,
}

#[derive(Default)]
struct Cache {
    modules: HashMap<String, ModuleEntry>,
    next_attempt: u64,
}

struct ModuleEntry {
    loader: LoaderFn,
    critical: bool,
    slot: Slot,
}

enum Slot {
    Unregistered,
    Loading {
        attempt: u64,
        done: watch::Receiver<Option<LoadOutcome>>,
    },
    Loaded(ModuleValue),
    Failed(LoadError),
}

impl LazyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the loader for `name`. Returns false and leaves the
    /// entry alone if the module is already loaded.
    pub fn register_lazy_module<F, Fut, T>(&self, name: impl Into<String>, loader: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        self.register(name.into(), erase(loader), false)
    }

    /// Like `register_lazy_module`, and the module gates `are_critical_modules_loaded`.
    /// Criticality is sticky: re-registering the name as a lazy module keeps the flag.
    pub fn register_critical_module<F, Fut, T>(&self, name: impl Into<String>, loader: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        self.register(name.into(), erase(loader), true)
    }

    fn register(&self, name: String, loader: LoaderFn, critical: bool) -> bool {
        let mut cache = self.lock();
        match cache.modules.get_mut(&name) {
            Some(entry) if matches!(entry.slot, Slot::Loaded(_)) => {
                debug!(module = %name, "already loaded, registration ignored");
                false
            }
            Some(entry) => {
                entry.loader = loader;
                entry.critical |= critical;
                debug!(module = %name, critical = entry.critical, "loader replaced");
                true
            }
            None => {
                cache.modules.insert(
                    name.clone(),
                    ModuleEntry {
                        loader,
                        critical,
                        slot: Slot::Unregistered,
                    },
                );
                debug!(module = %name, critical, "module registered");
                true
            }
        }
    }

    /// Load `name` and downcast it to the type its loader produced.
    pub async fn load_module<T>(&self, name: &str) -> Result<Arc<T>, LoadError>
    where
        T: Any + Send + Sync,
    {
        self.load_erased(name)
            .await?
            .downcast::<T>()
            .map_err(|_| LoadError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Load `name` without naming its type.
    ///
    /// The loader itself runs on a spawned tokio task, so dropping this future
    /// does not abandon a load other callers may be waiting on.
    pub async fn load_erased(&self, name: &str) -> LoadOutcome {
        let (attempt, mut done) = {
            let mut cache = self.lock();
            cache.next_attempt += 1;
            let attempt = cache.next_attempt;

            let Some(entry) = cache.modules.get_mut(name) else {
                return Err(LoadError::NotRegistered(name.to_string()));
            };

            match entry.slot {
                Slot::Loaded(ref value) => return Ok(Arc::clone(value)),
                Slot::Loading { attempt, ref done } => (attempt, done.clone()),
                Slot::Unregistered | Slot::Failed(_) => {
                    let (tx, rx) = watch::channel(None);
                    entry.slot = Slot::Loading {
                        attempt,
                        done: rx.clone(),
                    };
                    debug!(module = name, attempt, "loading module");
                    tokio::spawn(drive_load(
                        Arc::clone(&self.cache),
                        name.to_string(),
                        attempt,
                        Arc::clone(&entry.loader),
                        tx,
                    ));
                    (attempt, rx)
                }
            }
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            // The load task died without reporting (the loader panicked).
            self.abandon(name, attempt);
            Err(LoadError::Aborted(name.to_string()))
        })
    }

    /// Load every critical module concurrently. Returns the ones that failed, by name.
    pub async fn preload_critical_modules(&self) -> Vec<(String, LoadError)> {
        let names: Vec<String> = {
            let cache = self.lock();
            cache
                .modules
                .iter()
                .filter(|(_, entry)| entry.critical)
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut loads = JoinSet::new();
        for name in names {
            let loader = self.clone();
            loads.spawn(async move {
                let result = loader.load_erased(&name).await;
                (name, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = loads.join_next().await {
            match joined {
                Ok((name, Err(e))) => failures.push((name, e)),
                Ok(_) => {}
                Err(e) => warn!("critical module preload task failed: {}", e),
            }
        }
        failures.sort_by(|a, b| a.0.cmp(&b.0));

        info!(failed = failures.len(), "critical modules preloaded");
        failures
    }

    /// All known module names, sorted, whatever their state.
    pub fn registered_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// True when every critical module is loaded (trivially true with none).
    pub fn are_critical_modules_loaded(&self) -> bool {
        self.lock()
            .modules
            .values()
            .filter(|entry| entry.critical)
            .all(|entry| matches!(entry.slot, Slot::Loaded(_)))
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.lock().modules.get(name).map(|entry| entry.slot.state())
    }

    /// Error from the most recent load, while the module is in the Failed state.
    pub fn last_error(&self, name: &str) -> Option<LoadError> {
        match &self.lock().modules.get(name)?.slot {
            Slot::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.module_state(name) == Some(ModuleState::Loaded)
    }

    /// Drop every cached module (and any pending load's claim on the cache).
    /// Loaders stay registered, so modules can be loaded again afterwards.
    pub fn cleanup(&self) {
        let mut cache = self.lock();
        let mut dropped = 0usize;
        for entry in cache.modules.values_mut() {
            if !matches!(entry.slot, Slot::Unregistered) {
                entry.slot = Slot::Unregistered;
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "module cache cleared");
        }
    }

    fn abandon(&self, name: &str, attempt: u64) {
        let mut cache = self.lock();
        if let Some(entry) = cache.modules.get_mut(name) {
            if entry.slot.is_attempt(attempt) {
                entry.slot = Slot::Failed(LoadError::Aborted(name.to_string()));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        lock_cache(&self.cache)
    }
}

impl Slot {
    fn state(&self) -> ModuleState {
        match self {
            Slot::Unregistered => ModuleState::Unregistered,
            Slot::Loading { .. } => ModuleState::Loading,
            Slot::Loaded(_) => ModuleState::Loaded,
            Slot::Failed(_) => ModuleState::Failed,
        }
    }

    fn is_attempt(&self, attempt: u64) -> bool {
        matches!(self, Slot::Loading { attempt: current, .. } if *current == attempt)
    }
}

fn lock_cache(cache: &Mutex<Cache>) -> MutexGuard<'_, Cache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn erase<F, Fut, T>(loader: F) -> LoaderFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Any + Send + Sync,
{
    Arc::new(move || {
        let pending = loader();
        Box::pin(async move { pending.await.map(|value| Arc::new(value) as ModuleValue) }) as LoaderFuture
    })
}

async fn drive_load(
    cache: Arc<Mutex<Cache>>,
    name: String,
    attempt: u64,
    loader: LoaderFn,
    done: watch::Sender<Option<LoadOutcome>>,
) {
    let outcome = loader().await.map_err(|e| LoadError::Failed {
        name: name.clone(),
        cause: Arc::new(e),
    });

    {
        let mut cache = lock_cache(&cache);
        // A cleanup (or a newer attempt) since this load started means the
        // result goes to the waiters only, not into the cache.
        if let Some(entry) = cache.modules.get_mut(&name) {
            if entry.slot.is_attempt(attempt) {
                entry.slot = match &outcome {
                    Ok(value) => Slot::Loaded(Arc::clone(value)),
                    Err(e) => Slot::Failed(e.clone()),
                };
            }
        }
    }

    match &outcome {
        Ok(_) => info!(module = %name, "module loaded"),
        Err(e) => warn!(module = %name, "{}", e),
    }
    done.send_replace(Some(outcome));
}
