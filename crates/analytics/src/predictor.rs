//! Naive per-attribute-value conversion predictor.
//!
//! For every (attribute, value) pair currently held by at least one user, the
//! conversion rate is the number of booking events those users produced in the
//! window divided by the number of users holding the pair.

use crate::attributes::UserAttributeDirectory;
use crate::query::QueryEngine;
use chrono::{DateTime, Utc};
use insight_core::{
    AttributePredicate, AttributeValueCounts, ConversionPrediction, ConversionRates,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct ConversionPredictor {
    query: Arc<QueryEngine>,
    users: Arc<UserAttributeDirectory>,
}

impl ConversionPredictor {
    pub fn new(query: Arc<QueryEngine>, users: Arc<UserAttributeDirectory>) -> Self {
        Self { query, users }
    }

    /// attribute → value → number of distinct users currently holding that value.
    pub fn attribute_value_user_counts(&self) -> AttributeValueCounts {
        let mut counts = AttributeValueCounts::new();
        for (_, attributes) in self.users.snapshot() {
            for (name, value) in attributes.iter() {
                *counts
                    .entry(name.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    /// attribute → value → bookings per holder over `(anchor - window_hours, anchor]`.
    /// Pairs without holders have no defined rate; they never appear in the user
    /// counts, so every divisor below is at least one.
    pub fn conversion_rates(
        &self,
        book_event: &str,
        anchor: DateTime<Utc>,
        window_hours: u32,
    ) -> ConversionRates {
        let mut rates = ConversionRates::new();

        for (attribute, values) in self.attribute_value_user_counts() {
            let mut value_rates = BTreeMap::new();
            for (value, holders) in values {
                let predicate: AttributePredicate =
                    [(attribute.clone(), value.clone())].into_iter().collect();
                let bookings =
                    self.query
                        .window_sum(book_event, anchor, window_hours, Some(&predicate));
                value_rates.insert(value, bookings as f64 / holders as f64);
            }
            if !value_rates.is_empty() {
                rates.insert(attribute, value_rates);
            }
        }

        debug!(
            book_event,
            attributes = rates.len(),
            "Computed conversion rates"
        );
        rates
    }

    /// The best-converting pair, or `None` when no user has attributes.
    /// A winner at rate `0.0` means no holder converted in the window, not a signal.
    pub fn most_likely_converter(
        &self,
        book_event: &str,
        anchor: DateTime<Utc>,
        window_hours: u32,
    ) -> Option<ConversionPrediction> {
        best_pair(&self.conversion_rates(book_event, anchor, window_hours))
    }
}

/// Walk attributes then values in ascending order and keep the first pair whose rate
/// strictly exceeds the best seen so far, so ties resolve to the smallest pair.
pub fn best_pair(rates: &ConversionRates) -> Option<ConversionPrediction> {
    let mut best: Option<ConversionPrediction> = None;
    for (attribute, values) in rates {
        for (value, rate) in values {
            let better = best.as_ref().map_or(true, |b| *rate > b.rate);
            if better {
                best = Some(ConversionPrediction {
                    attribute: attribute.clone(),
                    value: value.clone(),
                    rate: *rate,
                });
            }
        }
    }
    best
}
