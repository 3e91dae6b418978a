//! Hourly event counters keyed by event name, hour bucket and user id.
//!
//! Locking is layered: the event-name index is a sharded `DashMap`, each event
//! series guards its ordered bucket index with an `RwLock`, and every bucket owns
//! its own `RwLock` over the per-user counts. Writers only contend on the bucket
//! they touch; a range scan copies the bucket handles out of the index and then
//! reads each bucket under its own lock, so long scans never block ingestion into
//! other buckets.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use insight_core::{HourBucket, InsightError, InsightResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

/// user_id -> count for one (event, hour) pair.
type BucketCounts = RwLock<HashMap<String, u64>>;

#[derive(Default)]
struct EventSeries {
    buckets: RwLock<BTreeMap<HourBucket, Arc<BucketCounts>>>,
}

impl EventSeries {
    fn bucket(&self, bucket: HourBucket) -> Arc<BucketCounts> {
        if let Some(counts) = self.buckets.read().get(&bucket) {
            return counts.clone();
        }
        self.buckets.write().entry(bucket).or_default().clone()
    }

    fn buckets_between(&self, first: HourBucket, last: HourBucket) -> Vec<Arc<BucketCounts>> {
        if first > last {
            return Vec::new();
        }
        self.buckets
            .read()
            .range(first..=last)
            .map(|(_, counts)| counts.clone())
            .collect()
    }
}

/// Concurrent hourly counter store.
pub struct EventStore {
    series: DashMap<String, Arc<EventSeries>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
        }
    }

    /// Increment the (event, hour bucket of `timestamp`, user) counter by one.
    /// Returns the counter's new value.
    pub fn record_event(
        &self,
        user_id: &str,
        event_name: &str,
        timestamp: DateTime<Utc>,
    ) -> InsightResult<u64> {
        let bucket = HourBucket::floor(timestamp);
        let series = match self.series.get(event_name) {
            Some(existing) => existing.value().clone(),
            None => self
                .series
                .entry(event_name.to_string())
                .or_default()
                .value()
                .clone(),
        };
        let counts = series.bucket(bucket);

        let mut guard = counts.write();
        let current = guard.get(user_id).copied().unwrap_or(0);
        let next = current.checked_add(1).ok_or_else(|| {
            error!(event = event_name, user_id, bucket = %bucket, "Event counter overflow");
            InsightError::Internal(format!(
                "counter overflow for event '{}' user '{}' at {}",
                event_name, user_id, bucket
            ))
        })?;
        guard.insert(user_id.to_string(), next);
        Ok(next)
    }

    /// Sum counts over every bucket whose hour lies in `[start, end]`, restricted to
    /// users accepted by `predicate` when one is given. Unknown events sum to zero.
    pub fn sum_range(
        &self,
        event_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        predicate: Option<&dyn Fn(&str) -> bool>,
    ) -> u64 {
        if start > end {
            return 0;
        }
        let Some(series) = self.series.get(event_name).map(|s| s.value().clone()) else {
            return 0;
        };

        // First bucket at or after `start`.
        let mut first = HourBucket::floor(start);
        if first.as_datetime() < start {
            first = first.shift(1);
        }
        let last = HourBucket::floor(end);

        series
            .buckets_between(first, last)
            .iter()
            .map(|counts| {
                let guard = counts.read();
                match predicate {
                    Some(accept) => guard
                        .iter()
                        .filter(|(user_id, _)| accept(user_id.as_str()))
                        .fold(0u64, |acc, (_, n)| acc.saturating_add(*n)),
                    None => guard.values().fold(0u64, |acc, n| acc.saturating_add(*n)),
                }
            })
            .fold(0u64, u64::saturating_add)
    }

    /// Oldest bucket holding data for `event_name`.
    pub fn earliest_bucket(&self, event_name: &str) -> Option<HourBucket> {
        let series = self.series.get(event_name)?;
        let first = series.buckets.read().keys().next().copied();
        first
    }

    /// Current count for a single (event, bucket, user) key.
    pub fn count(&self, event_name: &str, bucket: HourBucket, user_id: &str) -> u64 {
        let Some(series) = self.series.get(event_name).map(|s| s.value().clone()) else {
            return 0;
        };
        let counts = series.buckets.read().get(&bucket).cloned();
        counts
            .and_then(|c| {
                let guard = c.read();
                guard.get(user_id).copied()
            })
            .unwrap_or(0)
    }

    /// Known event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Total number of (event, hour) buckets held.
    pub fn bucket_count(&self) -> usize {
        self.series
            .iter()
            .map(|e| e.value().buckets.read().len())
            .sum()
    }

    /// Drop every bucket whose hour starts before the bucket containing `cutoff`.
    /// Returns the number of buckets removed.
    ///
    /// Buckets and series that a writer is holding at that moment are left in place
    /// and picked up by a later sweep, so an in-flight increment is never lost.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let horizon = HourBucket::floor(cutoff);
        let mut removed = 0;

        for entry in self.series.iter() {
            let mut buckets = entry.value().buckets.write();
            let stale: Vec<HourBucket> = buckets
                .range(..horizon)
                .filter(|(_, counts)| Arc::strong_count(counts) == 1)
                .map(|(bucket, _)| *bucket)
                .collect();
            for bucket in stale {
                buckets.remove(&bucket);
                removed += 1;
            }
        }

        self.series
            .retain(|_, series| Arc::strong_count(series) > 1 || !series.buckets.read().is_empty());

        if removed > 0 {
            debug!(removed, horizon = %horizon, "Evicted event buckets");
        }
        removed
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}
