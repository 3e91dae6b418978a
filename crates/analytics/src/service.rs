//! Validated façade over the stores, query engine and predictor.
//!
//! Every mutating call validates its input before touching a store, so a rejected
//! request leaves no trace. Queries are total: unknown events and users resolve to
//! zero or empty results.

use crate::attributes::UserAttributeDirectory;
use crate::event_store::EventStore;
use crate::predictor::ConversionPredictor;
use crate::query::QueryEngine;
use crate::retention::RetentionPolicy;
use chrono::{DateTime, Utc};
use insight_core::config::{AppConfig, EventNamesConfig, QueryConfig};
use insight_core::validation::{
    validate_attributes, validate_event_name, validate_timestamp, validate_user_id,
};
use insight_core::{
    AttributePredicate, AveragePoint, ConversionPrediction, ConversionRates, InsightError,
    InsightResult, UserAttributes,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store sizes reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub event_names: Vec<String>,
    pub buckets: usize,
    pub users: usize,
}

/// Both configured tracking counters over the last 24 hours.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedTotals {
    pub view_event: String,
    pub views: u64,
    pub book_event: String,
    pub bookings: u64,
}

pub struct InsightService {
    events: Arc<EventStore>,
    users: Arc<UserAttributeDirectory>,
    query: Arc<QueryEngine>,
    predictor: ConversionPredictor,
    retention: RetentionPolicy,
    event_names: EventNamesConfig,
    limits: QueryConfig,
}

impl InsightService {
    pub fn new(config: &AppConfig) -> Self {
        let events = Arc::new(EventStore::new());
        let users = Arc::new(UserAttributeDirectory::new());
        let query = Arc::new(QueryEngine::new(
            events.clone(),
            users.clone(),
            config.query.boundary,
        ));
        let predictor = ConversionPredictor::new(query.clone(), users.clone());
        let retention = RetentionPolicy::from_config(&config.retention);

        info!(
            boundary = ?config.query.boundary,
            retention = ?retention,
            view_event = %config.events.view_event,
            book_event = %config.events.book_event,
            "Insight service initialized"
        );

        Self {
            events,
            users,
            query,
            predictor,
            retention,
            event_names: config.events.clone(),
            limits: config.query.clone(),
        }
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn users(&self) -> &Arc<UserAttributeDirectory> {
        &self.users
    }

    pub fn event_names(&self) -> &EventNamesConfig {
        &self.event_names
    }

    // ─── Ingestion ──────────────────────────────────────────────────────

    /// Record one occurrence of `event_name` for `user_id` at `timestamp`.
    pub fn ingest(
        &self,
        user_id: &str,
        event_name: &str,
        timestamp: DateTime<Utc>,
    ) -> InsightResult<()> {
        rejecting(|| {
            validate_user_id(user_id)?;
            validate_event_name(event_name)?;
            validate_timestamp(&timestamp)
        })?;

        let count = self.events.record_event(user_id, event_name, timestamp)?;
        metrics::counter!("insight.events.recorded").increment(1);
        debug!(user_id, event = event_name, count, "Event recorded");
        Ok(())
    }

    /// Replace `user_id`'s attributes wholesale.
    pub fn set_user(&self, user_id: &str, attributes: UserAttributes) -> InsightResult<()> {
        rejecting(|| {
            validate_user_id(user_id)?;
            validate_attributes(&attributes)
        })?;

        let fields = attributes.len();
        self.users.set_attributes(user_id, attributes);
        metrics::counter!("insight.users.updated").increment(1);
        debug!(user_id, fields, "User attributes replaced");
        Ok(())
    }

    /// Record a view now and replace the viewer's attributes.
    pub fn track_view(&self, user_id: &str, attributes: UserAttributes) -> InsightResult<()> {
        self.track_view_at(user_id, attributes, Utc::now())
    }

    pub fn track_view_at(
        &self,
        user_id: &str,
        attributes: UserAttributes,
        timestamp: DateTime<Utc>,
    ) -> InsightResult<()> {
        // Validate both halves up front so a bad attribute set records no view.
        rejecting(|| validate_attributes(&attributes))?;
        self.ingest(user_id, &self.event_names.view_event, timestamp)?;
        self.set_user(user_id, attributes)
    }

    /// Record a booking now.
    pub fn track_booking(&self, user_id: &str) -> InsightResult<()> {
        self.track_booking_at(user_id, Utc::now())
    }

    pub fn track_booking_at(&self, user_id: &str, timestamp: DateTime<Utc>) -> InsightResult<()> {
        self.ingest(user_id, &self.event_names.book_event, timestamp)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn window_sum(
        &self,
        event_name: &str,
        window_end: DateTime<Utc>,
        window_hours: u32,
        predicate: Option<&AttributePredicate>,
    ) -> InsightResult<u64> {
        rejecting(|| {
            validate_timestamp(&window_end)?;
            self.check_window(window_hours)?;
            predicate.map_or(Ok(()), validate_attributes)
        })?;
        Ok(self
            .query
            .window_sum(event_name, window_end, window_hours, predicate))
    }

    pub fn last_24_hour_sum(&self, event_name: &str) -> u64 {
        self.query.last_24_hour_sum(event_name)
    }

    pub fn last_24_hour_sum_at(&self, event_name: &str, now: DateTime<Utc>) -> u64 {
        self.query.last_24_hour_sum_at(event_name, now)
    }

    /// Views and bookings over the last 24 hours.
    pub fn tracked_totals(&self) -> TrackedTotals {
        self.tracked_totals_at(Utc::now())
    }

    pub fn tracked_totals_at(&self, now: DateTime<Utc>) -> TrackedTotals {
        TrackedTotals {
            view_event: self.event_names.view_event.clone(),
            views: self.last_24_hour_sum_at(&self.event_names.view_event, now),
            book_event: self.event_names.book_event.clone(),
            bookings: self.last_24_hour_sum_at(&self.event_names.book_event, now),
        }
    }

    /// Rolling averages; `window_hours` defaults to the configured rolling window.
    pub fn rolling_average(
        &self,
        event_name: &str,
        anchor: DateTime<Utc>,
        num_points: usize,
        window_hours: Option<u32>,
        predicate: Option<&AttributePredicate>,
    ) -> InsightResult<Vec<AveragePoint>> {
        let window_hours = window_hours.unwrap_or(self.limits.rolling_window_hours);
        rejecting(|| {
            validate_timestamp(&anchor)?;
            self.check_window(window_hours)?;
            if num_points > self.limits.max_points {
                return Err(InsightError::validation(format!(
                    "num_points {} exceeds maximum of {}",
                    num_points, self.limits.max_points
                )));
            }
            predicate.map_or(Ok(()), validate_attributes)
        })?;
        Ok(self
            .query
            .rolling_average_series(event_name, anchor, num_points, window_hours, predicate))
    }

    /// Conversion rates; `window_hours` defaults to the configured conversion window.
    pub fn conversion_rates(
        &self,
        book_event: &str,
        anchor: DateTime<Utc>,
        window_hours: Option<u32>,
    ) -> InsightResult<ConversionRates> {
        let window_hours = self.conversion_window(anchor, window_hours)?;
        Ok(self
            .predictor
            .conversion_rates(book_event, anchor, window_hours))
    }

    pub fn most_likely_converter(
        &self,
        book_event: &str,
        anchor: DateTime<Utc>,
        window_hours: Option<u32>,
    ) -> InsightResult<Option<ConversionPrediction>> {
        let window_hours = self.conversion_window(anchor, window_hours)?;
        Ok(self
            .predictor
            .most_likely_converter(book_event, anchor, window_hours))
    }

    // ─── Maintenance ────────────────────────────────────────────────────

    /// Apply the configured retention policy as of `now`.
    pub fn enforce_retention(&self, now: DateTime<Utc>) -> usize {
        self.retention.apply(&self.events, now)
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            event_names: self.events.event_names(),
            buckets: self.events.bucket_count(),
            users: self.users.len(),
        }
    }

    fn conversion_window(
        &self,
        anchor: DateTime<Utc>,
        window_hours: Option<u32>,
    ) -> InsightResult<u32> {
        let window_hours = window_hours.unwrap_or(self.limits.conversion_window_hours);
        rejecting(|| {
            validate_timestamp(&anchor)?;
            self.check_window(window_hours)
        })?;
        Ok(window_hours)
    }

    fn check_window(&self, window_hours: u32) -> InsightResult<()> {
        if window_hours == 0 {
            return Err(InsightError::validation("window_hours must be at least 1"));
        }
        if window_hours > self.limits.max_window_hours {
            return Err(InsightError::validation(format!(
                "window_hours {} exceeds maximum of {}",
                window_hours, self.limits.max_window_hours
            )));
        }
        Ok(())
    }
}

/// Run boundary checks, counting and logging any rejection.
fn rejecting(check: impl FnOnce() -> InsightResult<()>) -> InsightResult<()> {
    check().inspect_err(|e| {
        metrics::counter!("insight.validation_errors").increment(1);
        warn!(error = %e, "Request rejected");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use insight_core::AttributeValue;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 8, h, 0, 0).unwrap()
    }

    fn city(name: &str) -> UserAttributes {
        [("city".to_string(), AttributeValue::from(name))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_ingest_rejects_before_mutation() {
        let service = InsightService::new(&AppConfig::default());
        assert!(service.ingest("", "view", at(18)).unwrap_err().is_validation());
        assert!(service.ingest("u1", " ", at(18)).unwrap_err().is_validation());
        let ancient = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
        assert!(service.ingest("u1", "view", ancient).unwrap_err().is_validation());
        assert_eq!(service.stats().buckets, 0);
    }

    #[test]
    fn test_set_user_rejects_non_finite_values() {
        let service = InsightService::new(&AppConfig::default());
        let mut attrs = city("SF");
        attrs.insert("score".to_string(), AttributeValue::Number(f64::NAN));
        assert!(service.set_user("u1", attrs).unwrap_err().is_validation());
        assert!(service.users().get_attributes("u1").is_none());
    }

    #[test]
    fn test_track_view_records_and_replaces() {
        let service = InsightService::new(&AppConfig::default());
        service.track_view_at("u1", city("SF"), at(18)).unwrap();
        service.track_view_at("u1", city("NYC"), at(18)).unwrap();
        service.track_booking_at("u1", at(18)).unwrap();

        let totals = service.tracked_totals_at(at(18));
        assert_eq!(totals.views, 2);
        assert_eq!(totals.bookings, 1);
        assert_eq!(service.users().get_attributes("u1"), Some(city("NYC")));
    }

    #[test]
    fn test_track_view_with_bad_attributes_records_nothing() {
        let service = InsightService::new(&AppConfig::default());
        let mut attrs = UserAttributes::new();
        attrs.insert(String::new(), AttributeValue::from("x"));
        assert!(service.track_view_at("u1", attrs, at(18)).is_err());
        assert_eq!(service.tracked_totals_at(at(18)).views, 0);
    }

    #[test]
    fn test_query_limits() {
        let service = InsightService::new(&AppConfig::default());
        assert!(service.window_sum("view", at(18), 0, None).is_err());
        assert!(service
            .window_sum("view", at(18), 24 * 366 + 1, None)
            .is_err());
        assert!(service
            .rolling_average("view", at(18), 100_000, None, None)
            .is_err());
        assert!(service.conversion_rates("book", at(18), Some(0)).is_err());
        assert_eq!(service.window_sum("view", at(18), 6, None).unwrap(), 0);
    }

    #[test]
    fn test_rolling_average_uses_configured_window() {
        let service = InsightService::new(&AppConfig::default());
        for _ in 0..12 {
            service.ingest("u1", "view", at(18)).unwrap();
        }
        for _ in 0..12 {
            service.ingest("u1", "view", at(10)).unwrap();
        }
        let series = service
            .rolling_average("view", at(18), 1, None, None)
            .unwrap();
        assert_eq!(series[0].average, 2.0);
    }

    #[test]
    fn test_enforce_retention() {
        let mut config = AppConfig::default();
        config.retention.max_age_hours = Some(2);
        let service = InsightService::new(&config);
        service.ingest("u1", "view", at(10)).unwrap();
        service.ingest("u1", "view", at(18)).unwrap();
        assert_eq!(service.enforce_retention(at(19)), 1);
        assert_eq!(service.stats().buckets, 1);
    }
}
