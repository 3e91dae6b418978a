//! Hourly-bucketed event aggregation, attribute-filtered queries and the naive
//! conversion predictor.

pub mod attributes;
pub mod event_store;
pub mod predictor;
pub mod query;
pub mod retention;
pub mod service;

pub use attributes::UserAttributeDirectory;
pub use event_store::EventStore;
pub use predictor::ConversionPredictor;
pub use query::QueryEngine;
pub use retention::RetentionPolicy;
pub use service::{InsightService, ServiceStats, TrackedTotals};
