use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod config;
pub mod contracts;

pub use config::MemoryConfig;

pub type ObservationId = i64;

pub const DEFAULT_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("unknown observation type: {0}")]
    UnknownObservationType(String),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("invalid id list {input:?}: {reason}")]
    InvalidIdList { input: String, reason: String },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("search query cannot be blank")]
    BlankQuery,
    #[error("concept cannot be blank")]
    BlankConcept,
    #[error("invalid memory path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("older_than_days {0} reaches past the earliest representable date")]
    ArchiveAgeOutOfRange(u32),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Learning,
    Decision,
    Blocker,
    Progress,
    Handoff,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Learning => "learning",
            ObservationType::Decision => "decision",
            ObservationType::Blocker => "blocker",
            ObservationType::Progress => "progress",
            ObservationType::Handoff => "handoff",
        }
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservationType {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "learning" => Ok(ObservationType::Learning),
            "decision" => Ok(ObservationType::Decision),
            "blocker" => Ok(ObservationType::Blocker),
            "progress" => Ok(ObservationType::Progress),
            "handoff" => Ok(ObservationType::Handoff),
            other => Err(ContractError::UnknownObservationType(other.to_string())),
        }
    }
}

/// A stored memory record. Only `concepts` and `bead_id` change after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: ObservationId,
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bead_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewObservation {
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub bead_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewObservation {
    pub fn new(kind: ObservationType, narrative: impl Into<String>) -> Self {
        Self {
            kind,
            narrative: narrative.into(),
            facts: Vec::new(),
            confidence: None,
            files_read: Vec::new(),
            files_modified: Vec::new(),
            concepts: Vec::new(),
            bead_id: None,
            expires_at: None,
        }
    }

    pub fn with_facts(mut self, facts: Vec<String>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_files(mut self, files_read: Vec<String>, files_modified: Vec<String>) -> Self {
        self.files_read = files_read;
        self.files_modified = files_modified;
        self
    }

    pub fn with_concepts(mut self, concepts: Vec<String>) -> Self {
        self.concepts = concepts;
        self
    }

    pub fn with_bead_id(mut self, bead_id: impl Into<String>) -> Self {
        self.bead_id = Some(bead_id.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn confidence_or_default(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// Concepts in first-seen order with blanks and repeats removed.
    pub fn normalized_concepts(&self) -> Vec<String> {
        let mut concepts: Vec<String> = Vec::with_capacity(self.concepts.len());
        for concept in &self.concepts {
            let concept = concept.trim();
            if concept.is_empty() || concepts.iter().any(|seen| seen == concept) {
                continue;
            }
            concepts.push(concept.to_string());
        }
        concepts
    }
}

/// A task row owned by the external tracker. Read-only from this side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
}
