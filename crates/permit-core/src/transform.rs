use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::derived::{
    AnalyticsCosts, AnalyticsLocation, AnalyticsRecord, AnalyticsTimeline, EventDetails,
    EventRecord, EventType, IngestionContact, IngestionCosts, IngestionDates, IngestionRecord,
    IngestionUsage,
};
use crate::{parse_permit_date, PermitRecord};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{field} is not a valid date: {value}")]
    InvalidDate { field: &'static str, value: String },
}

pub fn to_ingestion(record: &PermitRecord) -> IngestionRecord {
    let costs = match (record.estimated_cost, record.revised_cost) {
        (None, None) => None,
        (estimated, revised) => Some(IngestionCosts { estimated, revised }),
    };
    let usage = match (&record.existing_use, &record.proposed_use) {
        (None, None) => None,
        (existing, proposed) => Some(IngestionUsage {
            existing: existing.clone(),
            proposed: proposed.clone(),
        }),
    };

    IngestionRecord {
        permit_id: record.id.clone(),
        application_number: record.application_number.clone(),
        permit_type: record.permit_type.clone(),
        status: record.status.clone(),
        dates: IngestionDates {
            filed: record.filed_date.clone(),
            issued: record.issued_date.clone(),
            completed: record.completed_date.clone(),
        },
        description: record.description.clone(),
        costs,
        usage,
        plansets: record.plansets,
        location: record.location.clone(),
        contact: record.contact.as_ref().map(|contact| IngestionContact {
            applicant_name: contact.applicant_name.clone(),
            applicant_address: contact.applicant_address.clone(),
        }),
    }
}

/// Lifecycle events in fixed order: filed, issued, completed. An event is
/// emitted only when its date is present.
pub fn to_events(record: &PermitRecord) -> Vec<EventRecord> {
    let filed = Some((
        EventType::Filed,
        &record.filed_date,
        EventDetails::Filed {
            application_number: record.application_number.clone(),
            permit_type: record.permit_type.clone(),
        },
    ));
    let issued = record.issued_date.as_ref().map(|date| {
        (
            EventType::Issued,
            date,
            EventDetails::Issued {
                estimated_cost: record.estimated_cost,
                revised_cost: record.revised_cost,
            },
        )
    });
    let completed = record
        .completed_date
        .as_ref()
        .map(|date| (EventType::Completed, date, EventDetails::Completed {}));

    [filed, issued, completed]
        .into_iter()
        .flatten()
        .map(|(event_type, date, details)| EventRecord {
            permit_id: record.id.clone(),
            event_type,
            event_date: date.clone(),
            status: record.status.clone(),
            details,
        })
        .collect()
}

pub fn to_analytics(record: &PermitRecord) -> Result<AnalyticsRecord, TransformError> {
    let processing_days = match &record.issued_date {
        Some(issued) => {
            let filed = parse_field("filed_date", &record.filed_date)?;
            let issued = parse_field("issued_date", issued)?;
            Some(processing_days(filed, issued))
        }
        None => None,
    };
    let cost_variance = match (record.estimated_cost, record.revised_cost) {
        (Some(estimated), Some(revised)) => Some(revised - estimated),
        _ => None,
    };

    Ok(AnalyticsRecord {
        permit_id: record.id.clone(),
        permit_type: record.permit_type.clone(),
        location: AnalyticsLocation {
            block: record.location.block.clone(),
            lot: record.location.lot.clone(),
            zipcode: record.location.zipcode.clone(),
        },
        timeline: AnalyticsTimeline {
            filed_date: record.filed_date.clone(),
            issued_date: record.issued_date.clone(),
            completed_date: record.completed_date.clone(),
            processing_days,
        },
        costs: AnalyticsCosts {
            estimated: record.estimated_cost,
            revised: record.revised_cost,
            cost_variance,
        },
        inspection: record.inspection.clone(),
    })
}

/// Whole calendar days between two instants, rounded up.
pub fn processing_days(filed: DateTime<Utc>, issued: DateTime<Utc>) -> i64 {
    let millis = (issued - filed).num_milliseconds().abs();
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

fn parse_field(field: &'static str, value: &str) -> Result<DateTime<Utc>, TransformError> {
    parse_permit_date(value).ok_or_else(|| TransformError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
