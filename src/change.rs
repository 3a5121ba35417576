use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::errors::ProbeError;

/// Placeholder replaced by the iteration counter in record name templates.
pub const COUNTER_PLACEHOLDER: &str = "{n}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Caa,
    Cname,
    Mx,
    Ns,
    Ptr,
    Spf,
    Srv,
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Caa => "CAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Spf => "SPF",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
        }
    }

    /// Record types whose values are case-insensitive host names or addresses.
    pub fn is_case_insensitive(&self) -> bool {
        !matches!(self, RecordType::Txt | RecordType::Spf | RecordType::Caa)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Upsert,
    Delete,
}

impl ChangeAction {
    pub fn requires_values(&self) -> bool {
        !matches!(self, ChangeAction::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Pending,
    InSync,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Pending => f.write_str("PENDING"),
            ChangeStatus::InSync => f.write_str("INSYNC"),
        }
    }
}

/// What a converged replica is expected to answer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub name: String,
    pub record_type: RecordType,
    pub action: ChangeAction,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Validate)]
#[validate(schema(function = "validate_values_present"))]
pub struct ChangeRequest {
    #[validate(custom = "validate_record_name")]
    pub name: String,

    pub record_type: RecordType,

    pub values: Vec<String>,

    pub ttl: u32,

    pub action: ChangeAction,
}

impl ChangeRequest {
    pub fn new(
        name: impl Into<String>,
        record_type: RecordType,
        values: Vec<String>,
        ttl: u32,
        action: ChangeAction,
    ) -> Result<Self, ProbeError> {
        let request = Self {
            name: name.into(),
            record_type,
            values,
            ttl,
            action,
        };
        match request.validate() {
            Ok(_) => Ok(request),
            Err(error) => Err(ProbeError::InvalidRequest(error.to_string())),
        }
    }

    pub fn target(&self) -> RecordTarget {
        RecordTarget {
            name: self.name.clone(),
            record_type: self.record_type,
            action: self.action,
            values: self.values.clone(),
        }
    }
}

/// Provider acknowledgement of a submitted change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReceipt {
    pub change_id: String,
    /// Submission time as recorded by the provider.
    pub submitted_at: DateTime<Utc>,
    pub status: ChangeStatus,
    pub target: RecordTarget,
}

/// Per-iteration record settings; `name` may contain `{n}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RecordTemplate {
    #[validate(custom = "validate_name_template")]
    pub name: String,

    #[serde(rename = "type")]
    pub record_type: RecordType,

    #[serde(default = "default_ttl")]
    pub ttl: u32,

    #[serde(default)]
    pub values: Vec<String>,

    #[serde(default = "default_action")]
    pub action: ChangeAction,
}

fn default_ttl() -> u32 {
    60
}

fn default_action() -> ChangeAction {
    ChangeAction::Upsert
}

impl RecordTemplate {
    pub fn name_for(&self, counter: u64) -> String {
        self.name.replace(COUNTER_PLACEHOLDER, &counter.to_string())
    }

    pub fn request_for(&self, counter: u64) -> Result<ChangeRequest, ProbeError> {
        ChangeRequest::new(
            self.name_for(counter),
            self.record_type,
            self.values.clone(),
            self.ttl,
            self.action,
        )
    }
}

fn validate_values_present(request: &ChangeRequest) -> Result<(), ValidationError> {
    if request.action.requires_values() && request.values.is_empty() {
        return Err(ValidationError::new(
            "CREATE and UPSERT changes need at least one value",
        ));
    }
    if request.values.iter().any(|value| value.trim().is_empty()) {
        return Err(ValidationError::new("Record values must not be blank"));
    }

    return Ok(());
}

fn validate_name_template(template: &str) -> Result<(), ValidationError> {
    validate_record_name(&template.replace(COUNTER_PLACEHOLDER, "1"))
}

fn validate_record_name(name: &str) -> Result<(), ValidationError> {
    if is_valid_domain_name(name) {
        return Ok(());
    }
    Err(ValidationError::new("The record name is not a valid domain name"))
}

/// Checks label lengths and characters; a leading `*` label is allowed.
pub fn is_valid_domain_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').enumerate().all(|(position, label)| {
        if position == 0 && label == "*" {
            return true;
        }
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}
