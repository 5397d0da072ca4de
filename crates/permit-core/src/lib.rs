use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub mod derived;
pub mod transform;
pub mod validation;

pub use derived::{
    AnalyticsCosts, AnalyticsLocation, AnalyticsRecord, AnalyticsTimeline, EventDetails,
    EventRecord, EventType, IngestionContact, IngestionCosts, IngestionDates, IngestionRecord,
    IngestionUsage,
};
pub use transform::{processing_days, to_analytics, to_events, to_ingestion, TransformError};
pub use validation::{validate, ValidationResult};

/// One permit as it arrives from the municipal dataset feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitRecord {
    #[serde(deserialize_with = "deserialize_text")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub application_number: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub permit_type: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub status: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub filed_date: String,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub issued_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub completed_date: Option<String>,
    #[serde(deserialize_with = "deserialize_text")]
    pub description: String,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub revised_cost: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub existing_use: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub proposed_use: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_count")]
    pub plansets: Option<u32>,
    pub location: Location,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub inspection: Option<InspectionResult>,
}

impl PermitRecord {
    /// Decode a candidate payload that already passed [`validate`].
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "deserialize_text")]
    pub address: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub block: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub lot: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub zipcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(deserialize_with = "deserialize_text")]
    pub applicant_name: String,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub applicant_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionResult {
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub inspector_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub inspection_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub inspection_status: Option<String>,
}

/// Parse a permit date the way the dataset publishes them: RFC 3339 or
/// `+hhmm` offset timestamps, naive timestamps with or without seconds
/// (read as UTC) or bare calendar dates.
pub fn parse_permit_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Text as the feed publishes it: a string, or a number read as its
/// decimal text.
pub(crate) fn read_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Planset count: null or blank is absent, otherwise a non-negative integer
/// either as a number or as digits in a string.
pub(crate) fn read_count(value: &Value) -> Result<Option<u32>, &'static str> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| "invalid planset count"),
        Value::Number(n) => n
            .as_u64()
            .and_then(|u| u32::try_from(u).ok())
            .map(Some)
            .ok_or("invalid planset count"),
        _ => Err("expected number for plansets"),
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    read_text(&val).ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

/// Like [`deserialize_text`], but null and empty strings read as absent.
fn deserialize_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        other => read_text(&other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected string or number")),
    }
}

fn deserialize_opt_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    read_count(&val).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_identifiers_as_text() {
        let record = PermitRecord::from_value(&json!({
            "id": 202301,
            "application_number": "A-1",
            "permit_type": "alterations",
            "status": "filed",
            "filed_date": "2023-01-01",
            "description": "kitchen remodel",
            "plansets": "2",
            "location": {"address": "1 Market St", "block": 3712, "lot": "7", "zipcode": 94105}
        }))
        .expect("decode");

        assert_eq!(record.id, "202301");
        assert_eq!(record.location.block, "3712");
        assert_eq!(record.location.zipcode, "94105");
        assert_eq!(record.plansets, Some(2));
        assert!(record.issued_date.is_none());
        assert!(record.contact.is_none());
    }

    #[test]
    fn empty_optional_text_reads_as_absent() {
        let record = PermitRecord::from_value(&json!({
            "id": "p-1",
            "application_number": "A-1",
            "permit_type": "new construction",
            "status": "issued",
            "filed_date": "2023-01-01",
            "issued_date": "",
            "existing_use": null,
            "description": "garage",
            "location": {"address": "a", "block": "b", "lot": "c", "zipcode": "d"}
        }))
        .expect("decode");

        assert!(record.issued_date.is_none());
        assert!(record.existing_use.is_none());
    }

    #[test]
    fn parses_the_supported_date_shapes() {
        let midnight = parse_permit_date("2023-01-31").expect("bare date");
        assert_eq!(midnight.to_rfc3339(), "2023-01-31T00:00:00+00:00");
        assert!(parse_permit_date("2023-01-31T00:00:00Z").is_some());
        assert!(parse_permit_date("2023-01-31T08:30:00.000").is_some());
        assert!(parse_permit_date("2023-01-31 08:30:00").is_some());
        assert!(parse_permit_date("invalid-date").is_none());
        assert!(parse_permit_date("2023-02-30").is_none());
        assert!(parse_permit_date("").is_none());
    }

    #[test]
    fn parses_minute_precision_and_compact_offsets() {
        let minutes = parse_permit_date("2023-01-01T00:00").expect("no seconds");
        assert_eq!(minutes.to_rfc3339(), "2023-01-01T00:00:00+00:00");
        assert!(parse_permit_date("2023-01-01 17:45").is_some());

        let utc = parse_permit_date("2023-01-01T08:30:00+0000").expect("+0000 offset");
        assert_eq!(utc.to_rfc3339(), "2023-01-01T08:30:00+00:00");
        let pacific = parse_permit_date("2023-01-01T08:30:00.250-0800").expect("-0800 offset");
        assert_eq!(pacific.to_rfc3339(), "2023-01-01T16:30:00.250+00:00");

        assert!(parse_permit_date("2023-01-01T25:00").is_none());
    }

    #[test]
    fn planset_counts_accept_digits_and_whole_numbers_only() {
        assert_eq!(read_count(&json!(3)), Ok(Some(3)));
        assert_eq!(read_count(&json!(" 4 ")), Ok(Some(4)));
        assert_eq!(read_count(&json!("")), Ok(None));
        assert_eq!(read_count(&Value::Null), Ok(None));
        assert!(read_count(&json!(2.5)).is_err());
        assert!(read_count(&json!(-1)).is_err());
        assert!(read_count(&json!(true)).is_err());
    }
}
