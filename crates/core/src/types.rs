use crate::error::{InsightError, InsightResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

const SECS_PER_HOUR: i64 = 3600;

// ─── Hour Buckets ───────────────────────────────────────────────────────

/// An hour-aligned UTC instant; the unit of temporal aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HourBucket(DateTime<Utc>);

impl HourBucket {
    /// The bucket containing `ts` (minutes, seconds and sub-seconds zeroed).
    pub fn floor(ts: DateTime<Utc>) -> Self {
        let secs = ts.timestamp().div_euclid(SECS_PER_HOUR) * SECS_PER_HOUR;
        // MIN_UTC is itself hour-aligned, so the fallback is never taken for valid input.
        Self(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// The hour boundary following the bucket containing `ts`.
    pub fn next_boundary(ts: DateTime<Utc>) -> Self {
        Self::floor(ts).shift(1)
    }

    /// Move by `hours` (negative goes back), saturating at the representable range.
    pub fn shift(self, hours: i64) -> Self {
        let moved = Duration::try_hours(hours).and_then(|d| self.0.checked_add_signed(d));
        match moved {
            Some(ts) => Self(ts),
            None if hours < 0 => Self::floor(DateTime::<Utc>::MIN_UTC),
            None => Self::floor(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whole hours from `earlier` to `self`; negative when `earlier` is later.
    pub fn hours_since(self, earlier: HourBucket) -> i64 {
        (self.0 - earlier.0).num_hours()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for HourBucket {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::floor(ts)
    }
}

impl<'de> Deserialize<'de> for HourBucket {
    /// Decoded instants are floored, so a bucket is always hour-aligned.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DateTime::<Utc>::deserialize(deserializer).map(Self::floor)
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ─── Attribute Values ───────────────────────────────────────────────────

/// A scalar user attribute. Boolean concepts are carried as `Number(0.0)` / `Number(1.0)`.
///
/// Equality is type-aware: `Text("5")` never equals `Number(5.0)`. The total order
/// places every number before every text value, numbers ascending numerically and
/// texts ascending lexically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Explicit 0/1 encoding for boolean attributes such as `isMobile`.
    pub fn flag(on: bool) -> Self {
        Self::Number(if on { 1.0 } else { 0.0 })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    // -0.0 and 0.0 compare and hash as the same value.
    fn normalized(n: f64) -> f64 {
        if n == 0.0 {
            0.0
        } else {
            n
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AttributeValue {}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                Self::normalized(*a).total_cmp(&Self::normalized(*b))
            }
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                Self::normalized(*n).to_bits().hash(state);
            }
            Self::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for AttributeValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = InsightError;

    fn try_from(value: serde_json::Value) -> InsightResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Self::Number)
                .ok_or_else(|| InsightError::validation("numeric attribute is not finite")),
            serde_json::Value::Bool(_) => Err(InsightError::validation(
                "boolean attributes must be encoded as 0 or 1",
            )),
            serde_json::Value::Null => Err(InsightError::validation("attribute value is null")),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                InsightError::validation("attribute value must be a string or a number"),
            ),
        }
    }
}

/// Latest-known attributes for one user. Ordered so iteration is deterministic.
pub type UserAttributes = BTreeMap<String, AttributeValue>;

/// Exact-match conjunction: every listed key must equal the given value.
pub type AttributePredicate = BTreeMap<String, AttributeValue>;

// ─── Query Results ──────────────────────────────────────────────────────

/// One point of a rolling-average series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragePoint {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

/// attribute → value → number of distinct users holding it.
pub type AttributeValueCounts = BTreeMap<String, BTreeMap<AttributeValue, u64>>;

/// attribute → value → conversion rate. Pairs with no users are absent.
pub type ConversionRates = BTreeMap<String, BTreeMap<AttributeValue, f64>>;

/// The best-converting (attribute, value) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPrediction {
    pub attribute: String,
    pub value: AttributeValue,
    pub rate: f64,
}

/// How a rolling-average window is treated when it reaches past recorded history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowBoundary {
    /// Divide by the hours actually covered since the earliest bucket.
    #[default]
    ClampToHistory,
    /// Always divide by the nominal window length.
    Nominal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 8, h, m, s).unwrap()
    }

    #[test]
    fn test_floor_zeroes_minutes_and_seconds() {
        let ts = at(18, 42, 17) + Duration::milliseconds(250);
        assert_eq!(HourBucket::floor(ts).as_datetime(), at(18, 0, 0));
        assert_eq!(HourBucket::floor(at(18, 0, 0)).as_datetime(), at(18, 0, 0));
    }

    #[test]
    fn test_deserialize_floors_to_hour() {
        let bucket: HourBucket =
            serde_json::from_value(serde_json::json!("2024-09-08T18:42:17Z")).unwrap();
        assert_eq!(bucket.as_datetime(), at(18, 0, 0));
        assert_eq!(
            serde_json::to_value(bucket).unwrap(),
            serde_json::json!("2024-09-08T18:00:00Z")
        );
    }

    #[test]
    fn test_floor_before_epoch() {
        let ts = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(HourBucket::floor(ts).as_datetime(), expected);
    }

    #[test]
    fn test_next_boundary_always_advances() {
        assert_eq!(HourBucket::next_boundary(at(18, 5, 0)).as_datetime(), at(19, 0, 0));
        assert_eq!(HourBucket::next_boundary(at(18, 0, 0)).as_datetime(), at(19, 0, 0));
    }

    #[test]
    fn test_shift_and_hours_since() {
        let b = HourBucket::floor(at(18, 0, 0));
        assert_eq!(b.shift(-6).as_datetime(), at(12, 0, 0));
        assert_eq!(b.hours_since(b.shift(-6)), 6);
        assert_eq!(b.shift(-6).hours_since(b), -6);
    }

    #[test]
    fn test_shift_saturates() {
        let b = HourBucket::floor(at(0, 0, 0));
        let low = b.shift(i64::MIN);
        assert!(low < b);
        let high = b.shift(i64::MAX);
        assert!(high > b);
    }

    #[test]
    fn test_attribute_equality_is_type_aware() {
        assert_ne!(AttributeValue::from("5"), AttributeValue::from(5));
        assert_eq!(AttributeValue::from(1), AttributeValue::flag(true));
        assert_eq!(AttributeValue::Number(-0.0), AttributeValue::Number(0.0));
    }

    #[test]
    fn test_attribute_order_numbers_before_text() {
        let mut values = vec![
            AttributeValue::from("b"),
            AttributeValue::from(10),
            AttributeValue::from("a"),
            AttributeValue::from(2),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                AttributeValue::from(2),
                AttributeValue::from(10),
                AttributeValue::from("a"),
                AttributeValue::from("b"),
            ]
        );
    }

    #[test]
    fn test_attribute_from_json() {
        assert_eq!(
            AttributeValue::try_from(serde_json::json!("Chicago")).unwrap(),
            AttributeValue::from("Chicago")
        );
        assert_eq!(
            AttributeValue::try_from(serde_json::json!(1)).unwrap(),
            AttributeValue::flag(true)
        );
        assert!(AttributeValue::try_from(serde_json::json!(true)).is_err());
        assert!(AttributeValue::try_from(serde_json::json!(null)).is_err());
        assert!(AttributeValue::try_from(serde_json::json!(["a"])).is_err());
        assert!(AttributeValue::try_from(serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn test_attribute_serde_untagged() {
        let v: AttributeValue = serde_json::from_str("\"SF\"").unwrap();
        assert_eq!(v, AttributeValue::from("SF"));
        let n: AttributeValue = serde_json::from_str("34").unwrap();
        assert_eq!(n, AttributeValue::from(34));
        assert_eq!(serde_json::to_string(&AttributeValue::from("SF")).unwrap(), "\"SF\"");
    }

    #[test]
    fn test_attribute_display() {
        assert_eq!(AttributeValue::from(34).to_string(), "34");
        assert_eq!(AttributeValue::Number(0.5).to_string(), "0.5");
        assert_eq!(AttributeValue::from("SF").to_string(), "SF");
    }
}
