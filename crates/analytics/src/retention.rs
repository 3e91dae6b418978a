//! Configurable eviction of old hour buckets.

use crate::event_store::EventStore;
use chrono::{DateTime, Duration, Utc};
use insight_core::config::RetentionConfig;
use tracing::info;

/// How long event buckets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep every bucket forever.
    #[default]
    Unbounded,
    /// Drop buckets whose hour started more than `hours` before now.
    MaxAge { hours: u32 },
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Self {
        match config.max_age_hours {
            Some(hours) if hours > 0 => Self::MaxAge { hours },
            _ => Self::Unbounded,
        }
    }

    /// Instant before which buckets are dropped, if any.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Unbounded => None,
            Self::MaxAge { hours } => Duration::try_hours(i64::from(*hours))
                .and_then(|age| now.checked_sub_signed(age)),
        }
    }

    /// Evict expired buckets from `store`. Returns the number removed.
    pub fn apply(&self, store: &EventStore, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = self.cutoff(now) else {
            return 0;
        };
        let removed = store.evict_before(cutoff);
        if removed > 0 {
            metrics::counter!("insight.retention.evicted_buckets").increment(removed as u64);
            info!(removed, cutoff = %cutoff, "Retention sweep evicted buckets");
        }
        removed
    }
}
