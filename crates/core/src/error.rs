use thiserror::Error;

pub type InsightResult<T> = Result<T, InsightError>;

#[derive(Error, Debug)]
pub enum InsightError {
    /// Malformed input rejected before any store was touched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A store invariant would have been violated; only the offending operation is aborted.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl InsightError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<config::ConfigError> for InsightError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
