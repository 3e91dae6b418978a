//! Windowed sums and rolling-average series over the event store.

use crate::attributes::UserAttributeDirectory;
use crate::event_store::EventStore;
use chrono::{DateTime, Utc};
use insight_core::{AttributePredicate, AveragePoint, HourBucket, WindowBoundary};
use std::sync::Arc;

/// Hours in the `last_24_hour_sum` window.
pub const DAY_HOURS: u32 = 24;

/// Read-only query layer over the two stores.
pub struct QueryEngine {
    events: Arc<EventStore>,
    users: Arc<UserAttributeDirectory>,
    boundary: WindowBoundary,
}

impl QueryEngine {
    pub fn new(
        events: Arc<EventStore>,
        users: Arc<UserAttributeDirectory>,
        boundary: WindowBoundary,
    ) -> Self {
        Self {
            events,
            users,
            boundary,
        }
    }

    pub fn boundary(&self) -> WindowBoundary {
        self.boundary
    }

    /// Sum of `event_name` over the hour buckets in `(window_end - window_hours, window_end]`,
    /// restricted to users matching `predicate` when one is given.
    pub fn window_sum(
        &self,
        event_name: &str,
        window_end: DateTime<Utc>,
        window_hours: u32,
        predicate: Option<&AttributePredicate>,
    ) -> u64 {
        if window_hours == 0 {
            return 0;
        }
        let first = HourBucket::floor(window_end).shift(1 - i64::from(window_hours));

        match predicate.filter(|p| !p.is_empty()) {
            Some(attrs) => {
                let accept = |user_id: &str| self.users.matches(user_id, attrs);
                self.events
                    .sum_range(event_name, first.as_datetime(), window_end, Some(&accept))
            }
            None => self
                .events
                .sum_range(event_name, first.as_datetime(), window_end, None),
        }
    }

    /// Sum over the 24 hours ending at the next hour boundary after now.
    pub fn last_24_hour_sum(&self, event_name: &str) -> u64 {
        self.last_24_hour_sum_at(event_name, Utc::now())
    }

    /// `last_24_hour_sum` evaluated as if the current time were `now`.
    pub fn last_24_hour_sum_at(&self, event_name: &str, now: DateTime<Utc>) -> u64 {
        let window_end = HourBucket::next_boundary(now).as_datetime();
        self.window_sum(event_name, window_end, DAY_HOURS, None)
    }

    /// Trailing-window averages at `floor_hour(anchor)`, one hour earlier, and so on,
    /// `num_points` in total. Always returns exactly `num_points` entries.
    pub fn rolling_average_series(
        &self,
        event_name: &str,
        anchor: DateTime<Utc>,
        num_points: usize,
        window_hours: u32,
        predicate: Option<&AttributePredicate>,
    ) -> Vec<AveragePoint> {
        let window_hours = window_hours.max(1);
        let top = HourBucket::floor(anchor);
        let earliest = self.events.earliest_bucket(event_name);

        (0..num_points)
            .map(|k| {
                let point = top.shift(-(k as i64));
                let hours = self.effective_window(point, window_hours, earliest);
                let sum = self.window_sum(event_name, point.as_datetime(), hours, predicate);
                AveragePoint {
                    timestamp: point.as_datetime(),
                    average: sum as f64 / f64::from(hours),
                }
            })
            .collect()
    }

    /// Divisor for the window ending at `point`. Under `ClampToHistory`, a window that
    /// starts before the earliest recorded bucket only counts the hours from that bucket
    /// through `point` (at least one).
    fn effective_window(
        &self,
        point: HourBucket,
        window_hours: u32,
        earliest: Option<HourBucket>,
    ) -> u32 {
        let (WindowBoundary::ClampToHistory, Some(earliest)) = (self.boundary, earliest) else {
            return window_hours;
        };
        let nominal_first = point.shift(1 - i64::from(window_hours));
        if nominal_first >= earliest {
            return window_hours;
        }
        let covered = point.hours_since(earliest) + 1;
        covered.clamp(1, i64::from(window_hours)) as u32
    }
}
