//! Boundary checks shared by the service façade and the HTTP layer.
//! Everything here runs before a store is touched.

use crate::error::{InsightError, InsightResult};
use crate::types::{AttributeValue, UserAttributes};
use chrono::{DateTime, Datelike, Utc};

/// Maximum length of user ids, event names and attribute names.
pub const MAX_FIELD_LEN: usize = 256;

/// Earliest and latest years accepted for event timestamps and query anchors.
const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 9999;

pub fn validate_user_id(user_id: &str) -> InsightResult<()> {
    validate_field("user id", user_id)
}

pub fn validate_event_name(event_name: &str) -> InsightResult<()> {
    validate_field("event name", event_name)
}

pub fn validate_timestamp(ts: &DateTime<Utc>) -> InsightResult<()> {
    if ts.year() < MIN_YEAR || ts.year() > MAX_YEAR {
        return Err(InsightError::validation(format!(
            "timestamp {} is outside {}..={}",
            ts.to_rfc3339(),
            MIN_YEAR,
            MAX_YEAR
        )));
    }
    Ok(())
}

/// Parse an RFC 3339 timestamp such as `2024-09-08T18:00:00Z`.
pub fn parse_timestamp(raw: &str) -> InsightResult<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| InsightError::validation(format!("malformed timestamp '{}': {}", raw, e)))?
        .with_timezone(&Utc);
    validate_timestamp(&ts)?;
    Ok(ts)
}

pub fn validate_attributes(attributes: &UserAttributes) -> InsightResult<()> {
    for (name, value) in attributes {
        validate_field("attribute name", name)?;
        if let AttributeValue::Number(n) = value {
            if !n.is_finite() {
                return Err(InsightError::validation(format!(
                    "attribute '{}' is not a finite number",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Convert a raw JSON object into typed attributes, rejecting non-scalar values.
pub fn attributes_from_json(
    raw: serde_json::Map<String, serde_json::Value>,
) -> InsightResult<UserAttributes> {
    let mut attributes = UserAttributes::new();
    for (name, value) in raw {
        let value = AttributeValue::try_from(value).map_err(|e| match e {
            InsightError::Validation(msg) => {
                InsightError::validation(format!("attribute '{}': {}", name, msg))
            }
            other => other,
        })?;
        attributes.insert(name, value);
    }
    validate_attributes(&attributes)?;
    Ok(attributes)
}

fn validate_field(what: &str, value: &str) -> InsightResult<()> {
    if value.trim().is_empty() {
        return Err(InsightError::validation(format!("{} must not be empty", what)));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(InsightError::validation(format!(
            "{} exceeds maximum length",
            what
        )));
    }
    Ok(())
}
