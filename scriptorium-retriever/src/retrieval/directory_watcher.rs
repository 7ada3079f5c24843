//! Polling monitor for one corpus root.
//!
//! Each tick fingerprints every matched file (hash, size, mtime) and compares
//! the result with the per-file state stored by the previous tick. Paths whose
//! fingerprint differs, new paths and vanished paths are all deltas. Deltas are
//! routed to handlers by predicate, so a route only sees the paths it asked for.
//!
//! ```text
//! Idle ──tick──► Scanning ──no delta──► Idle
//!                    │
//!                    └──delta──► Changed ──persist, dispatch──► Idle
//! ```
//!
//! Handler errors are logged and never stop the loop. A route whose handler
//! failed gets the same paths again on the next tick, together with any new
//! ones, until the handler succeeds.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::change_detector::ChangeDetector;
use super::indexing_engine::IndexingEngine;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{FileStateStore, PerFileState};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Scanning,
    Changed,
}

/// Receives the changed paths a route matched.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, paths: &[String]) -> Result<()>;
}

pub type PathPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct ChangeRoute {
    pub name: String,
    predicate: PathPredicate,
    handler: Arc<dyn ChangeHandler>,
    /// Paths of the last failed delivery
    pending: Mutex<BTreeSet<String>>,
}

impl ChangeRoute {
    pub fn new<F>(name: impl Into<String>, predicate: F, handler: Arc<dyn ChangeHandler>) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            handler,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Route every changed path to `handler`.
    pub fn all(name: impl Into<String>, handler: Arc<dyn ChangeHandler>) -> Self {
        Self::new(name, |_| true, handler)
    }

    /// Route changes to one exact root-relative path.
    pub fn exact(name: impl Into<String>, path: impl Into<String>, handler: Arc<dyn ChangeHandler>) -> Self {
        let path = path.into();
        Self::new(name, move |p| p == path, handler)
    }
}

/// Runs an indexing pass whenever the corpus changes.
pub struct IndexingHandler {
    engine: Arc<IndexingEngine>,
}

impl IndexingHandler {
    pub fn new(engine: Arc<IndexingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ChangeHandler for IndexingHandler {
    async fn on_change(&self, paths: &[String]) -> Result<()> {
        debug!("{} corpus paths changed, running indexing pass", paths.len());
        let report = self.engine.run_pass().await?;
        if !report.failed.is_empty() {
            anyhow::bail!("{} files failed to index", report.failed.len());
        }
        Ok(())
    }
}

/// Logs changes to the identity file.
pub struct IdentityHandler;

#[async_trait]
impl ChangeHandler for IdentityHandler {
    async fn on_change(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            info!("Identity file changed: {}", path);
        }
        Ok(())
    }
}

pub struct DirectoryMonitor {
    detector: ChangeDetector,
    store: SqliteStore,
    routes: Vec<ChangeRoute>,
    interval: Duration,
    state: RwLock<MonitorState>,
}

impl DirectoryMonitor {
    /// `interval` is floored at one second.
    pub fn new(detector: ChangeDetector, store: SqliteStore, interval: Duration) -> Self {
        Self {
            detector,
            store,
            routes: Vec::new(),
            interval: interval.max(MIN_INTERVAL),
            state: RwLock::new(MonitorState::Idle),
        }
    }

    pub fn with_route(mut self, route: ChangeRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    async fn set_state(&self, state: MonitorState) {
        *self.state.write().await = state;
    }

    /// One poll. Returns the changed paths, sorted.
    ///
    /// New file states are persisted before dispatch, so handlers see the
    /// state rows of the paths they receive. Paths a handler failed on are
    /// redelivered even when nothing new changed.
    pub async fn tick(&self) -> Result<Vec<String>> {
        self.set_state(MonitorState::Scanning).await;
        let changed = match self.detect().await {
            Ok(changed) => changed,
            Err(err) => {
                self.set_state(MonitorState::Idle).await;
                return Err(err);
            }
        };

        if changed.is_empty() {
            if !self.has_pending().await {
                self.set_state(MonitorState::Idle).await;
                return Ok(changed);
            }
            info!("Redelivering paths to previously failed change handlers");
        } else {
            info!(
                "Detected {} changed paths under {}",
                changed.len(),
                self.detector.root().display()
            );
        }

        self.set_state(MonitorState::Changed).await;
        self.dispatch(&changed).await;
        self.set_state(MonitorState::Idle).await;
        Ok(changed)
    }

    /// Compare fingerprints with stored states and persist the new ones.
    async fn detect(&self) -> Result<Vec<String>> {
        let current = self.detector.scan_fingerprints_async().await?;
        let stored: HashMap<String, PerFileState> = self
            .store
            .list_file_states()
            .await?
            .into_iter()
            .map(|s| (s.path.clone(), s))
            .collect();

        let mut changed = BTreeSet::new();
        let now = Utc::now();
        for (path, fp) in &current {
            let unchanged = stored
                .get(path)
                .is_some_and(|s| s.same_as(&fp.hash, fp.size, fp.mtime));
            if unchanged {
                continue;
            }
            changed.insert(path.clone());
            self.store
                .upsert_file_state(&PerFileState {
                    path: path.clone(),
                    hash: fp.hash.clone(),
                    size: fp.size,
                    mtime: fp.mtime,
                    indexed_at: None,
                    last_seen: now,
                })
                .await?;
        }

        for path in stored.keys().filter(|p| !current.contains_key(*p)) {
            changed.insert(path.clone());
            self.store.remove_file_state(path).await?;
        }

        Ok(changed.into_iter().collect())
    }

    async fn has_pending(&self) -> bool {
        for route in &self.routes {
            if !route.pending.lock().await.is_empty() {
                return true;
            }
        }
        false
    }

    async fn dispatch(&self, changed: &[String]) {
        for route in &self.routes {
            let mut matching = std::mem::take(&mut *route.pending.lock().await);
            matching.extend(
                changed
                    .iter()
                    .filter(|p| (route.predicate)(p.as_str()))
                    .cloned(),
            );
            if matching.is_empty() {
                continue;
            }
            let paths: Vec<String> = matching.iter().cloned().collect();
            if let Err(err) = route.handler.on_change(&paths).await {
                error!(
                    "Change handler {} failed: {:#}; {} paths will be redelivered",
                    route.name,
                    err,
                    matching.len()
                );
                *route.pending.lock().await = matching;
            }
        }
    }

    /// Poll forever.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Monitoring {} every {:?}",
            self.detector.root().display(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                error!("Monitor tick failed for {}: {:#}", self.detector.root().display(), err);
            }
        }
    }

    /// [`run`](Self::run) as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
