pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{InsightError, InsightResult};
pub use types::{
    AttributePredicate, AttributeValue, AttributeValueCounts, AveragePoint, ConversionPrediction,
    ConversionRates, HourBucket, UserAttributes, WindowBoundary,
};
