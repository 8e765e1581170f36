use crate::{ContractError, ObservationId, ObservationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_TIMELINE_WINDOW: usize = 3;
pub const DEFAULT_ARCHIVE_AGE_DAYS: u32 = 90;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, rename = "type")]
    pub kind: Option<ObservationType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            kind: None,
            limit: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: ObservationId,
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub narrative: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Ids as accepted at the boundary: `"1,2,3"`, `[1, "2"]` or a bare `7`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IdSelector {
    Single(ObservationId),
    Text(String),
    List(Vec<Value>),
}

impl IdSelector {
    pub fn resolve(&self) -> Result<Vec<ObservationId>, ContractError> {
        match self {
            IdSelector::Single(id) => Ok(vec![*id]),
            IdSelector::Text(text) => parse_id_list(text),
            IdSelector::List(values) => values
                .iter()
                .map(|value| match value {
                    Value::Number(number) => {
                        number.as_i64().ok_or_else(|| ContractError::InvalidIdList {
                            input: number.to_string(),
                            reason: "ids must be integers".to_string(),
                        })
                    }
                    Value::String(text) => parse_single_id(text, text),
                    other => Err(ContractError::InvalidIdList {
                        input: other.to_string(),
                        reason: "expected number or numeric string".to_string(),
                    }),
                })
                .collect(),
        }
    }
}

pub fn parse_id_list(input: &str) -> Result<Vec<ObservationId>, ContractError> {
    if input.trim().is_empty() {
        return Err(ContractError::InvalidIdList {
            input: input.to_string(),
            reason: "no ids given".to_string(),
        });
    }
    input
        .split(',')
        .map(|segment| parse_single_id(segment, input))
        .collect()
}

fn parse_single_id(segment: &str, input: &str) -> Result<ObservationId, ContractError> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return Err(ContractError::InvalidIdList {
            input: input.to_string(),
            reason: "empty id segment".to_string(),
        });
    }
    trimmed
        .parse::<ObservationId>()
        .map_err(|err| ContractError::InvalidIdList {
            input: input.to_string(),
            reason: format!("{trimmed:?}: {err}"),
        })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRequest {
    pub ids: IdSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineRequest {
    pub id: ObservationId,
    #[serde(default)]
    pub before: Option<usize>,
    #[serde(default)]
    pub after: Option<usize>,
}

impl TimelineRequest {
    pub fn new(id: ObservationId) -> Self {
        Self {
            id,
            before: None,
            after: None,
        }
    }

    pub fn window(&self) -> (usize, usize) {
        (
            self.before.unwrap_or(DEFAULT_TIMELINE_WINDOW),
            self.after.unwrap_or(DEFAULT_TIMELINE_WINDOW),
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateResponse {
    pub id: ObservationId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminOperation {
    Status,
    Archive,
    Checkpoint,
    Vacuum,
    Migrate,
}

impl AdminOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminOperation::Status => "status",
            AdminOperation::Archive => "archive",
            AdminOperation::Checkpoint => "checkpoint",
            AdminOperation::Vacuum => "vacuum",
            AdminOperation::Migrate => "migrate",
        }
    }
}

impl fmt::Display for AdminOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminOperation {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "status" => Ok(AdminOperation::Status),
            "archive" => Ok(AdminOperation::Archive),
            "checkpoint" => Ok(AdminOperation::Checkpoint),
            "vacuum" => Ok(AdminOperation::Vacuum),
            "migrate" => Ok(AdminOperation::Migrate),
            other => Err(ContractError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminRequest {
    pub operation: String,
    #[serde(default)]
    pub older_than_days: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

impl AdminRequest {
    pub fn new(operation: AdminOperation) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            older_than_days: None,
            dry_run: false,
        }
    }

    pub fn archive(older_than_days: u32, dry_run: bool) -> Self {
        Self {
            operation: AdminOperation::Archive.as_str().to_string(),
            older_than_days: Some(older_than_days),
            dry_run,
        }
    }

    pub fn parsed_operation(&self) -> Result<AdminOperation, ContractError> {
        self.operation.parse()
    }

    pub fn archive_age_days(&self) -> u32 {
        self.older_than_days.unwrap_or(DEFAULT_ARCHIVE_AGE_DAYS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum AdminDetails {
    Status {
        total_observations: i64,
        by_type: Vec<TypeCount>,
        expired_observations: i64,
        indexed_observations: i64,
        schema_version: i64,
    },
    ArchivePreview {
        would_archive: i64,
        cutoff_date: DateTime<Utc>,
    },
    Archived {
        archived: i64,
        cutoff_date: DateTime<Utc>,
    },
    Checkpoint {
        checkpoint_path: String,
    },
    Vacuum {
        db_size_bytes: u64,
        previous_size_bytes: u64,
    },
    Migrate {
        from_version: i64,
        to_version: i64,
        applied: Vec<i64>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdminReport {
    pub operation: String,
    pub success: bool,
    pub details: AdminDetails,
}

impl AdminReport {
    pub fn ok(operation: AdminOperation, details: AdminDetails) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            success: true,
            details,
        }
    }

    pub fn failed(operation: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            operation: operation.into(),
            success: false,
            details: AdminDetails::Error {
                error: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    SyncToMemory,
    SyncFromMemory,
    Link,
    Status,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::SyncToMemory => "sync_to_memory",
            SyncOperation::SyncFromMemory => "sync_from_memory",
            SyncOperation::Link => "link",
            SyncOperation::Status => "status",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "sync_to_memory" => Ok(SyncOperation::SyncToMemory),
            "sync_from_memory" => Ok(SyncOperation::SyncFromMemory),
            "link" => Ok(SyncOperation::Link),
            "status" => Ok(SyncOperation::Status),
            other => Err(ContractError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    pub operation: String,
    #[serde(default, rename = "beadId")]
    pub bead_id: Option<String>,
    #[serde(default, rename = "observationId")]
    pub observation_id: Option<ObservationId>,
}

impl SyncRequest {
    pub fn new(operation: SyncOperation) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            bead_id: None,
            observation_id: None,
        }
    }

    pub fn link(observation_id: ObservationId, bead_id: impl Into<String>) -> Self {
        Self {
            operation: SyncOperation::Link.as_str().to_string(),
            bead_id: Some(bead_id.into()),
            observation_id: Some(observation_id),
        }
    }

    pub fn parsed_operation(&self) -> Result<SyncOperation, ContractError> {
        self.operation.parse()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_synced: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations_linked: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tasks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_store_present: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    pub operation: String,
    pub details: SyncDetails,
}

impl SyncReport {
    pub fn ok(operation: SyncOperation, details: SyncDetails) -> Self {
        Self {
            success: true,
            operation: operation.as_str().to_string(),
            details,
        }
    }

    pub fn failed(operation: impl Into<String>) -> Self {
        Self {
            success: false,
            operation: operation.into(),
            details: SyncDetails::default(),
        }
    }
}
