//! In-memory result archive and per-target state registry.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::models::*;
use crate::config::Config;
use crate::status::{AlertState, PingWatcher};

/// Bounded, chronologically ordered log of samples for one target.
#[derive(Debug, Clone)]
pub struct Archive {
    samples: Vec<Sample>,
    limit: usize,
}

impl Archive {
    pub fn new(limit: usize) -> Self {
        Self {
            samples: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record a sample.
    ///
    /// An empty archive always takes the sample. Otherwise `force_append`
    /// grows the log and a plain record refreshes the newest entry in place.
    /// The oldest entries are trimmed to keep the retention limit.
    pub fn record(&mut self, sample: Sample, force_append: bool) {
        match self.samples.last_mut() {
            Some(last) if !force_append => *last = sample,
            _ => self.samples.push(sample),
        }

        if self.samples.len() > self.limit {
            let excess = self.samples.len() - self.limit;
            self.samples.drain(..excess);
        }
    }

    /// Decide whether this tick should poll the target at all.
    ///
    /// Forced ticks always sample. Otherwise idle servers (no active players
    /// in the newest sample) and servers whose two newest polls failed are
    /// left alone until the next forced tick.
    pub fn should_sample(&self, force_append: bool) -> bool {
        if force_append {
            return true;
        }

        let mut newest = self.samples.iter().rev();
        let Some(last) = newest.next() else {
            return true;
        };

        if let Some(info) = last.info() {
            return info.active_players() > 0;
        }

        !matches!(newest.next(), Some(prev) if prev.is_failure())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Everything the service remembers about one target.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub archive: Archive,
    pub watchers: Vec<PingWatcher>,
    pub alert: AlertState,
    /// Latest address the target was polled at
    pub endpoint: Option<Endpoint>,
}

/// Results for one target as exposed to the web layer.
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub key: String,
    pub results: Vec<SimpleResult>,
}

/// Read-only view of all archives as of the latest completed tick.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub targets: Vec<TargetSnapshot>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, key: &str) -> Option<&TargetSnapshot> {
        self.targets.iter().find(|t| t.key == key)
    }
}

/// Process-wide registry of per-target state, keyed by target `url_path`.
///
/// Each target only ever touches its own entry and no lock is held across
/// an await point.
pub struct Registry {
    retention: usize,
    order: RwLock<Vec<String>>,
    targets: RwLock<HashMap<String, TargetState>>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Registry {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            order: RwLock::new(Vec::new()),
            targets: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Build a registry with every configured target and its ping watchers.
    pub fn from_config(cfg: &Config) -> Self {
        let registry = Self::new(cfg.result_archive_limit);
        for server in &cfg.servers {
            let watchers = server
                .pings
                .iter()
                .map(|p| PingWatcher::new(p.threshold, &p.role))
                .collect();
            registry.register(&server.url_path, watchers);
        }
        registry
    }

    /// Register a target. Watchers are kept in ascending threshold order.
    pub fn register(&self, key: &str, mut watchers: Vec<PingWatcher>) {
        watchers.sort_by_key(|w| w.threshold);

        let mut targets = write(&self.targets);
        if targets.contains_key(key) {
            return;
        }
        targets.insert(
            key.to_string(),
            TargetState {
                archive: Archive::new(self.retention),
                watchers,
                alert: AlertState::default(),
                endpoint: None,
            },
        );
        write(&self.order).push(key.to_string());
    }

    /// Whether the target should be polled on this tick.
    pub fn should_sample(&self, key: &str, force_append: bool) -> bool {
        read(&self.targets)
            .get(key)
            .map(|t| t.archive.should_sample(force_append))
            .unwrap_or(true)
    }

    /// Record a sample, creating the target's entry on first use.
    pub fn record(&self, key: &str, sample: Sample, force_append: bool) {
        let mut targets = write(&self.targets);
        if !targets.contains_key(key) {
            drop(targets);
            self.register(key, Vec::new());
            targets = write(&self.targets);
        }

        if let Some(state) = targets.get_mut(key) {
            if let Some(endpoint) = &sample.endpoint {
                state.endpoint = Some(endpoint.clone());
            }
            state.archive.record(sample, force_append);
        }
    }

    /// Run `f` against a target's state under the write lock.
    pub fn with_target<R>(&self, key: &str, f: impl FnOnce(&mut TargetState) -> R) -> Option<R> {
        write(&self.targets).get_mut(key).map(f)
    }

    /// Copy of a target's archive, oldest first.
    pub fn archive(&self, key: &str) -> Vec<Sample> {
        read(&self.targets)
            .get(key)
            .map(|t| t.archive.samples().to_vec())
            .unwrap_or_default()
    }

    /// Latest polled address of a target, for redirects.
    pub fn endpoint(&self, key: &str) -> Option<Endpoint> {
        read(&self.targets).get(key).and_then(|t| t.endpoint.clone())
    }

    /// Empty every archive so the rolling window restarts.
    pub fn reset(&self) {
        let mut targets = write(&self.targets);
        for state in targets.values_mut() {
            state.archive.clear();
        }
        tracing::info!("Registry: cleared {} archives", targets.len());
    }

    /// Capture the current archives for readers.
    pub fn publish_snapshot(&self, now: DateTime<Utc>) {
        let targets = read(&self.targets);
        let order = read(&self.order);

        let snapshot = Snapshot {
            targets: order
                .iter()
                .filter_map(|key| {
                    let state = targets.get(key)?;
                    if state.archive.is_empty() {
                        return None;
                    }
                    Some(TargetSnapshot {
                        key: key.clone(),
                        results: state.archive.samples().iter().map(SimpleResult::from).collect(),
                    })
                })
                .collect(),
            last_update: Some(now),
        };

        *write(&self.snapshot) = Arc::new(snapshot);
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        read(&self.snapshot).clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
