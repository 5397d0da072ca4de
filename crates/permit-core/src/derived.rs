use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{InspectionResult, Location};

// Ingestion shape: source fields regrouped, absent values omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub permit_id: String,
    pub application_number: String,
    pub permit_type: String,
    pub status: String,
    pub dates: IngestionDates,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costs: Option<IngestionCosts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<IngestionUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plansets: Option<u32>,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<IngestionContact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionDates {
    pub filed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionCosts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionContact {
    pub applicant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicant_address: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Filed,
    Issued,
    Completed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Filed => "filed",
            EventType::Issued => "issued",
            EventType::Completed => "completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "filed" => Ok(EventType::Filed),
            "issued" => Ok(EventType::Issued),
            "completed" => Ok(EventType::Completed),
            other => Err(format!("Unknown event type: {other}")),
        }
    }
}

/// A lifecycle event. `status` is always the permit's current overall
/// status, not a per-event status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub permit_id: String,
    pub event_type: EventType,
    pub event_date: String,
    pub status: String,
    pub details: EventDetails,
}

/// Write-only: the variant is carried by `EventRecord::event_type`, so the
/// untagged form is not read back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    Filed {
        application_number: String,
        permit_type: String,
    },
    Issued {
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_cost: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        revised_cost: Option<f64>,
    },
    Completed {},
}

// Analytics shape: every field is always written, absence is an explicit null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub permit_id: String,
    pub permit_type: String,
    pub location: AnalyticsLocation,
    pub timeline: AnalyticsTimeline,
    pub costs: AnalyticsCosts,
    pub inspection: Option<InspectionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsLocation {
    pub block: String,
    pub lot: String,
    pub zipcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsTimeline {
    pub filed_date: String,
    pub issued_date: Option<String>,
    pub completed_date: Option<String>,
    pub processing_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsCosts {
    pub estimated: Option<f64>,
    pub revised: Option<f64>,
    pub cost_variance: Option<f64>,
}
