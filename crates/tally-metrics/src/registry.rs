//! Metric family registry — the single shared, lock-protected store.
//!
//! All families and series live behind one `std::sync::Mutex`. Every
//! critical section is a hash lookup plus a small in-memory update; text
//! formatting and I/O always run on a [`Snapshot`] after the lock is
//! released.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use tally_core::config::{MetricsConfig, DEFAULT_BUCKETS, DEFAULT_QUANTILES, DEFAULT_SUMMARY_WINDOW};
use tally_core::{ConflictPolicy, Labels, MetricType, MetricsError, MetricsResult};

use crate::series::{Series, SeriesValue};

/// Construction-time settings for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Prepended to every family name when rendering.
    pub prefix: String,
    pub buckets: Arc<[f64]>,
    pub quantiles: Arc<[f64]>,
    pub summary_window: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            buckets: Arc::from(DEFAULT_BUCKETS.to_vec()),
            quantiles: Arc::from(DEFAULT_QUANTILES.to_vec()),
            summary_window: DEFAULT_SUMMARY_WINDOW,
            conflict_policy: ConflictPolicy::Reject,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            buckets: Arc::from(config.buckets.clone()),
            quantiles: Arc::from(config.quantiles.clone()),
            summary_window: config.summary_window,
            conflict_policy: config.conflict_policy,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_buckets(mut self, buckets: &[f64]) -> Self {
        self.buckets = Arc::from(buckets.to_vec());
        self
    }

    pub fn with_summary(mut self, quantiles: &[f64], window: usize) -> Self {
        self.quantiles = Arc::from(quantiles.to_vec());
        self.summary_window = window;
        self
    }
}

/// All series sharing one metric name.
#[derive(Debug)]
pub struct Family {
    pub name: String,
    pub kind: MetricType,
    pub help: String,
    /// Sorted by label set so render order is stable.
    pub series: BTreeMap<Labels, Series>,
}

impl Family {
    fn new(name: &str, kind: MetricType, help: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            help: help.to_string(),
            series: BTreeMap::new(),
        }
    }

    /// Look up the series for `labels`, creating an empty one on first use.
    pub fn get_or_create_series(
        &mut self,
        labels: &Labels,
        options: &RegistryOptions,
        now: Instant,
    ) -> MetricsResult<&mut Series> {
        match self.series.entry(labels.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let zero = SeriesValue::zero(self.kind, options)
                    .ok_or_else(|| MetricsError::NoCustomCollector(self.name.clone()))?;
                Ok(entry.insert(Series::new(zero, now)))
            }
        }
    }
}

/// Lock-protected contents of a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryState {
    /// Creation order.
    families: Vec<Family>,
    /// name → position in `families`.
    index: HashMap<String, usize>,
}

impl RegistryState {
    /// Find the family for `name`, creating it on first sight.
    ///
    /// A type mismatch is resolved by `policy`: `Reject` returns
    /// [`MetricsError::TypeConflict`] without touching the family, `Replace`
    /// drops every series and re-types the family in place.
    pub fn get_or_create_family(
        &mut self,
        name: &str,
        kind: MetricType,
        help: &str,
        policy: ConflictPolicy,
    ) -> MetricsResult<&mut Family> {
        if kind == MetricType::Custom {
            return Err(MetricsError::NoCustomCollector(name.to_string()));
        }

        let idx = match self.index.get(name).copied() {
            Some(idx) => idx,
            None => {
                let idx = self.families.len();
                self.families.push(Family::new(name, kind, help));
                self.index.insert(name.to_string(), idx);
                debug!(metric = %name, %kind, "family created");
                return Ok(&mut self.families[idx]);
            }
        };

        let family = &mut self.families[idx];
        if family.kind != kind {
            match policy {
                ConflictPolicy::Reject => {
                    return Err(MetricsError::TypeConflict {
                        name: name.to_string(),
                        existing: family.kind,
                        attempted: kind,
                    });
                }
                ConflictPolicy::Replace => {
                    warn!(
                        metric = %name,
                        from = %family.kind,
                        to = %kind,
                        dropped = family.series.len(),
                        "family re-typed, existing series dropped"
                    );
                    family.kind = kind;
                    family.help = help.to_string();
                    family.series.clear();
                }
            }
        } else if family.help.is_empty() && !help.is_empty() {
            family.help = help.to_string();
        }
        Ok(family)
    }

    pub fn family(&self, name: &str) -> Option<&Family> {
        self.index.get(name).map(|&idx| &self.families[idx])
    }

    fn clear(&mut self) {
        self.families.clear();
        self.index.clear();
    }
}

/// Point-in-time copy of one family.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub kind: MetricType,
    pub help: String,
    pub series: Vec<(Labels, SeriesValue)>,
}

/// Point-in-time copy of the whole registry, safe to format without locks.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub prefix: String,
    pub quantiles: Arc<[f64]>,
    /// Creation order.
    pub families: Vec<FamilySnapshot>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.name == name)
    }
}

/// Concurrency-safe table of metric families.
///
/// `Registry` is `Send + Sync`; share it behind an `Arc` between the
/// ingestion path, scrape handlers, and the [`Expirer`](crate::Expirer).
#[derive(Debug)]
pub struct Registry {
    options: RegistryOptions,
    state: Mutex<RegistryState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            options,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn prefix(&self) -> &str {
        &self.options.prefix
    }

    // Every mutation completes before its guard drops, so a panic elsewhere
    // cannot leave a torn value behind and the poisoned state is usable.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` as one critical section over the registry state.
    ///
    /// `f` must stay CPU-only and short: no I/O, no awaiting.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    /// Register a family ahead of traffic so its help and type are known.
    pub fn declare(&self, name: &str, kind: MetricType, help: &str) -> MetricsResult<()> {
        let policy = self.options.conflict_policy;
        self.with_state(|state| state.get_or_create_family(name, kind, help, policy).map(|_| ()))
    }

    /// Owned copy of every family and series, in render order.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        let families = state
            .families
            .iter()
            .map(|f| FamilySnapshot {
                name: f.name.clone(),
                kind: f.kind,
                help: f.help.clone(),
                series: f
                    .series
                    .iter()
                    .map(|(labels, s)| (labels.clone(), s.value.clone()))
                    .collect(),
            })
            .collect();
        drop(state);

        Snapshot {
            prefix: self.options.prefix.clone(),
            quantiles: self.options.quantiles.clone(),
            families,
        }
    }

    /// Drop every family and series.
    pub fn reset(&self) {
        let mut state = self.lock();
        let families = state.families.len();
        state.clear();
        drop(state);
        debug!(families, "registry reset");
    }

    /// Remove series idle for longer than `ttl` as of `now`.
    ///
    /// Age is evaluated inside the same critical section that removes the
    /// series, so a series refreshed or created after `now` is kept.
    /// Families are never removed. Returns the number of series dropped.
    pub fn expire_stale(&self, ttl: Duration, now: Instant) -> usize {
        let mut state = self.lock();
        let mut removed = 0;
        for family in &mut state.families {
            let before = family.series.len();
            family
                .series
                .retain(|_, s| now.saturating_duration_since(s.last_seen) <= ttl);
            removed += before - family.series.len();
        }
        removed
    }

    /// Current value of one series, if present.
    pub fn series_value(&self, name: &str, labels: &Labels) -> Option<SeriesValue> {
        let state = self.lock();
        state
            .family(name)
            .and_then(|f| f.series.get(labels))
            .map(|s| s.value.clone())
    }

    pub fn family_count(&self) -> usize {
        self.lock().families.len()
    }

    pub fn series_count(&self) -> usize {
        self.lock().families.iter().map(|f| f.series.len()).sum()
    }
}
