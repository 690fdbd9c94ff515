//! Test orchestration engine
//!
//! Owns the test catalog and the busy lock. Every operation that runs tests
//! or mutates the catalog must win `try_lock` on the run state first; a
//! caller that finds the lock held gets `Error::Busy` immediately instead of
//! queueing. The per-run test cache lives inside the guarded state, so only
//! the lock holder can see or change it.
//!
//! Observers never touch the lock itself: `busy` mirrors the guard's lifetime
//! and the cache of the last finished run is published as a snapshot.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::bus::{self, BusGateway, NatsGateway};
use crate::common::config::Config;
use crate::common::{CommandAllowlist, Error, Result};
use crate::matcher::Matcher;
use crate::template::TemplateEngine;

use super::catalog::{self, Catalog, TestEntries, TestEntry};

/// Test name that selects every public test
pub const ALL_TESTS: &str = "all";

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Number of tests executed
    pub tests: usize,
    /// Number of entries executed across all tests
    pub entries: usize,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(duration: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis() as u64)
}

/// Snapshot of the engine state
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub busy: bool,
    /// Milliseconds since the last run started, if any run started yet
    pub elapsed_ms: Option<u64>,
    /// Public test names in listing order
    pub tests: Vec<String>,
}

/// State owned by whoever holds the busy lock
#[derive(Debug, Default)]
struct RunState {
    /// Resolved requests and actual responses of the current or last run
    cache: TestEntries,
}

/// Holder of the busy lock; clears the busy flag when released
struct RunGuard<'a> {
    state: AsyncMutexGuard<'a, RunState>,
    busy: &'a AtomicBool,
}

impl Deref for RunGuard<'_> {
    type Target = RunState;

    fn deref(&self) -> &RunState {
        &self.state
    }
}

impl DerefMut for RunGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunState {
        &mut self.state
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Single-flight test orchestrator
pub struct Engine {
    catalog: RwLock<Catalog>,
    run: AsyncMutex<RunState>,
    busy: AtomicBool,
    /// Cache published at the end of every run
    last_cache: Mutex<TestEntries>,
    started_at: Mutex<Option<Instant>>,
    templates: TemplateEngine,
    matcher: Matcher,
    gateway: Arc<dyn BusGateway>,
    dirs: Vec<PathBuf>,
    bus_timeout: Duration,
}

impl Engine {
    /// Create an engine with an empty catalog
    pub fn new(
        gateway: Arc<dyn BusGateway>,
        allowlist: Arc<CommandAllowlist>,
        dirs: Vec<PathBuf>,
        bus_timeout: Duration,
    ) -> Self {
        Self {
            catalog: RwLock::new(Catalog::new()),
            run: AsyncMutex::new(RunState::default()),
            busy: AtomicBool::new(false),
            last_cache: Mutex::new(TestEntries::new()),
            started_at: Mutex::new(None),
            templates: TemplateEngine::new(allowlist.clone()),
            matcher: Matcher::new(allowlist),
            gateway,
            dirs,
            bus_timeout,
        }
    }

    /// Create an engine talking to the configured NATS server
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let gateway = NatsGateway::new(&config.bus.address, &config.bus.name, config.bus.timeout())?;
        let allowlist = CommandAllowlist::new(config.commands.allowed.iter());
        tracing::debug!(
            address = gateway.address(),
            commands = allowlist.len(),
            "engine configured"
        );

        Ok(Self::new(
            Arc::new(gateway),
            Arc::new(allowlist),
            config.test_dirs(),
            config.bus.timeout(),
        ))
    }

    /// Replace the catalog wholesale, for embedding and tests
    pub fn with_catalog(self, catalog: Catalog) -> Self {
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        self
    }

    /// Rebuild the catalog from the configured directories
    ///
    /// The new catalog is built on the side and swapped in only when loading
    /// succeeds, so a failed reload leaves the previous catalog in place.
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.acquire()?;

        let dirs = self.dirs.clone();
        let loaded = blocking(move || Catalog::load(&dirs)).await;
        let catalog = match loaded {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "reload failed, keeping the previous catalog");
                return Err(e);
            }
        };

        let count = catalog.len();
        *self.catalog_mut() = catalog;
        tracing::info!(tests = count, "test catalog reloaded");
        Ok(count)
    }

    /// Run one test by name, or every public test when `name` is `all`
    pub async fn run_test(&self, name: &str) -> Result<RunReport> {
        if name == ALL_TESTS {
            return self.run_all().await;
        }

        let mut guard = self.acquire()?;
        let started = Instant::now();

        let entries = self
            .entries(name)
            .ok_or_else(|| Error::TestNotFound(name.to_string()))?;
        self.execute(&mut guard, name, &entries).await?;

        Ok(RunReport {
            tests: 1,
            entries: entries.len(),
            duration: started.elapsed(),
        })
    }

    /// Run every public test in listing order, stopping at the first failure
    pub async fn run_all(&self) -> Result<RunReport> {
        let mut guard = self.acquire()?;
        let started = Instant::now();

        let names = self.test_names();
        let mut entries_run = 0;
        for name in &names {
            let entries = self
                .entries(name)
                .ok_or_else(|| Error::TestNotFound(name.clone()))?;
            self.execute(&mut guard, name, &entries).await?;
            entries_run += entries.len();
        }

        tracing::info!(tests = names.len(), "all tests completed successfully");
        Ok(RunReport {
            tests: names.len(),
            entries: entries_run,
            duration: started.elapsed(),
        })
    }

    /// Store a test definition under `name` and run it, as one locked operation
    pub async fn run_definition(&self, name: &str, definition: &[u8]) -> Result<RunReport> {
        let mut guard = self.acquire()?;
        let started = Instant::now();

        if !catalog::is_valid_name(name) || name == ALL_TESTS {
            return Err(Error::parse(name, "invalid test name"));
        }
        let entries = catalog::parse_entries(name, definition)?;

        let is_new = self.catalog_mut().insert(name.to_string(), entries.clone());
        tracing::info!(test = name, entries = entries.len(), is_new, "stored test definition");

        self.execute(&mut guard, name, &entries).await?;
        Ok(RunReport {
            tests: 1,
            entries: entries.len(),
            duration: started.elapsed(),
        })
    }

    /// Remove a test from the catalog
    pub async fn delete_test(&self, name: &str) -> Result<()> {
        let _guard = self.acquire()?;
        self.catalog_mut().remove(name)?;
        tracing::info!(test = name, "deleted test definition");
        Ok(())
    }

    /// Current state without taking the busy lock
    pub fn status(&self) -> EngineStatus {
        let elapsed_ms = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed().as_millis() as u64);

        EngineStatus {
            busy: self.is_busy(),
            elapsed_ms,
            tests: self.test_names(),
        }
    }

    /// Status plus a bus connectivity probe; `Error::Busy` while a run is active
    pub async fn health(&self) -> Result<EngineStatus> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.gateway.check().await?;
        Ok(self.status())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Public test names in listing order
    pub fn test_names(&self) -> Vec<String> {
        self.catalog().public_names()
    }

    /// Every test name, internal ones included
    pub fn all_test_names(&self) -> Vec<String> {
        self.catalog().names().to_vec()
    }

    /// Test cache left by the last run
    pub fn last_cache(&self) -> Result<TestEntries> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        Ok(self.last_cache.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn acquire(&self) -> Result<RunGuard<'_>> {
        let state = self.run.try_lock().map_err(|_| {
            tracing::debug!("rejecting request, another run is in progress");
            Error::Busy
        })?;
        self.busy.store(true, Ordering::Release);
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(RunGuard {
            state,
            busy: &self.busy,
        })
    }

    fn catalog(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn catalog_mut(&self) -> std::sync::RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries(&self, name: &str) -> Option<TestEntries> {
        self.catalog().get(name).cloned()
    }

    /// Run the entries of one test in order on a fresh cache
    async fn execute(&self, state: &mut RunState, name: &str, entries: &[TestEntry]) -> Result<()> {
        tracing::info!(test = name, entries = entries.len(), "running test");

        state.cache = entries
            .iter()
            .map(|e| TestEntry::new(e.topic.clone(), Value::Null, Value::Null))
            .collect();

        let mut result = Ok(());
        for (index, entry) in entries.iter().enumerate() {
            if let Err(e) = self.execute_entry(&mut state.cache, index, entry).await {
                let e = e.in_entry(name, &entry.topic, index);
                tracing::warn!(test = name, topic = %entry.topic, index, error = %e, "test failed");
                result = Err(e);
                break;
            }
        }

        *self.last_cache.lock().unwrap_or_else(PoisonError::into_inner) = state.cache.clone();
        if result.is_ok() {
            tracing::info!(test = name, "test passed");
        }
        result
    }

    async fn execute_entry(&self, cache: &mut TestEntries, index: usize, entry: &TestEntry) -> Result<()> {
        let request = self.resolve(&entry.request, cache).await?;
        cache[index].request = request.clone();

        let payload = serde_json::to_vec(&request)?;
        tracing::debug!(topic = %entry.topic, index, "dispatching request");
        let raw = bus::dispatch(self.gateway.as_ref(), &entry.topic, &payload, self.bus_timeout).await?;

        let actual: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::InvalidResponse(format!("{} ({})", e, String::from_utf8_lossy(&raw))))?;
        cache[index].response = actual.clone();

        // The expected response may reference the actual response just stored
        let expected = self.resolve(&entry.response, cache).await?;

        if !Matcher::runs_commands(&expected) {
            return self.matcher.check(&expected, &actual).map_err(Error::from);
        }
        let matcher = self.matcher.clone();
        blocking(move || matcher.check(&expected, &actual).map_err(Error::from)).await
    }

    /// Resolve templates, moving off the async threads only when a transform
    /// has to spawn a process
    async fn resolve(&self, tree: &Value, cache: &[TestEntry]) -> Result<Value> {
        if !TemplateEngine::runs_commands(tree) {
            return self.templates.resolve(tree, cache);
        }
        let templates = self.templates.clone();
        let tree = tree.clone();
        let context = cache.to_vec();
        blocking(move || templates.resolve(&tree, &context)).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))?
}
