use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{parse_permit_date, read_count, read_text};

pub const PERMIT_REQUIRED: &str = "Permit data is required";

const REQUIRED_FIELDS: [(&str, &str); 6] = [
    ("id", "Permit ID"),
    ("application_number", "Application number"),
    ("permit_type", "Permit type"),
    ("status", "Status"),
    ("filed_date", "Filed date"),
    ("description", "Description"),
];

const LOCATION_FIELDS: [(&str, &str); 4] = [
    ("address", "Location address"),
    ("block", "Location block"),
    ("lot", "Location lot"),
    ("zipcode", "Location zipcode"),
];

const DATE_FIELDS: [&str; 3] = ["filed_date", "issued_date", "completed_date"];

const COST_FIELDS: [(&str, &str); 2] = [
    ("estimated_cost", "Estimated cost must be a positive number"),
    ("revised_cost", "Revised cost must be a positive number"),
];

const USAGE_FIELDS: [(&str, &str); 2] = [
    ("existing_use", "Existing use"),
    ("proposed_use", "Proposed use"),
];

const INSPECTION_FIELDS: [(&str, &str); 3] = [
    ("inspector_name", "Inspector name"),
    ("inspection_date", "Inspection date"),
    ("inspection_status", "Inspection status"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check a raw candidate payload. Every defect is collected; nothing
/// short-circuits except an absent payload. A candidate that passes always
/// decodes into a [`crate::PermitRecord`].
pub fn validate(candidate: Option<&Value>) -> ValidationResult {
    let fields = match candidate {
        None | Some(Value::Null) => {
            return ValidationResult::from_errors(vec![PERMIT_REQUIRED.to_string()]);
        }
        Some(Value::Object(fields)) => Some(fields),
        Some(_) => None,
    };
    let lookup = |key: &str| fields.and_then(|map| map.get(key));

    let mut errors = Vec::new();

    for (key, label) in REQUIRED_FIELDS {
        let value = lookup(key);
        if is_missing(value) {
            errors.push(format!("{label} is required"));
        } else if !DATE_FIELDS.contains(&key) {
            check_text(&mut errors, value, label);
        }
    }

    match lookup("location") {
        value if is_missing(value) => errors.push("Location is required".to_string()),
        value => {
            let location = value.and_then(Value::as_object);
            for (key, label) in LOCATION_FIELDS {
                let value = field(location, key);
                if is_missing(value) {
                    errors.push(format!("{label} is required"));
                } else {
                    check_text(&mut errors, value, label);
                }
            }
        }
    }

    if let Some(contact) = lookup("contact").filter(|value| !value.is_null()) {
        match contact.as_object() {
            Some(contact) => {
                let name = contact.get("applicant_name");
                if is_missing(name) {
                    errors.push("Contact applicant name is required".to_string());
                } else {
                    check_text(&mut errors, name, "Contact applicant name");
                }
                check_text(
                    &mut errors,
                    contact.get("applicant_address"),
                    "Contact applicant address",
                );
            }
            None => errors.push("Contact must be an object".to_string()),
        }
    }

    for key in DATE_FIELDS {
        let value = lookup(key);
        if !is_missing(value) && !is_valid_date(value) {
            errors.push(format!("{key} must be a valid date"));
        }
    }

    for (key, message) in COST_FIELDS {
        match lookup(key) {
            None | Some(Value::Null) => {}
            Some(value) => {
                let acceptable = value.as_f64().map(|cost| cost >= 0.0).unwrap_or(false);
                if !acceptable {
                    errors.push(message.to_string());
                }
            }
        }
    }

    for (key, label) in USAGE_FIELDS {
        check_text(&mut errors, lookup(key), label);
    }

    if let Some(plansets) = lookup("plansets") {
        if read_count(plansets).is_err() {
            errors.push("plansets must be a non-negative integer".to_string());
        }
    }

    if let Some(inspection) = lookup("inspection").filter(|value| !value.is_null()) {
        match inspection.as_object() {
            Some(inspection) => {
                for (key, label) in INSPECTION_FIELDS {
                    check_text(&mut errors, inspection.get(key), label);
                }
            }
            None => errors.push("Inspection must be an object".to_string()),
        }
    }

    ValidationResult::from_errors(errors)
}

fn field<'a>(object: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Value> {
    object.and_then(|map| map.get(key))
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Present values must read as text; absent ones are left to the
/// required-field checks.
fn check_text(errors: &mut Vec<String>, value: Option<&Value>, label: &str) {
    if is_missing(value) {
        return;
    }
    if value.and_then(read_text).is_none() {
        errors.push(format!("{label} must be text"));
    }
}

fn is_valid_date(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .and_then(parse_permit_date)
        .is_some()
}
