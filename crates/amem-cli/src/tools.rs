use amem_core::contracts::{
    AdminReport, AdminRequest, CreateResponse, FetchRequest, SearchHit, SearchRequest,
    SyncReport, SyncRequest, TimelineRequest,
};
use amem_core::{ContractError, MemoryConfig, NewObservation, Observation};
use amem_storage::{MemoryStore, StorageError};
use amem_sync::SyncBridge;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Search,
    Fetch,
    Timeline,
    Create,
    Admin,
    Sync,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Search => "search",
            Tool::Fetch => "fetch",
            Tool::Timeline => "timeline",
            Tool::Create => "create",
            Tool::Admin => "admin",
            Tool::Sync => "sync",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "search" => Ok(Tool::Search),
            "fetch" => Ok(Tool::Fetch),
            "timeline" => Ok(Tool::Timeline),
            "create" => Ok(Tool::Create),
            "admin" => Ok(Tool::Admin),
            "sync" => Ok(Tool::Sync),
            other => Err(ContractError::UnknownOperation(other.to_string())),
        }
    }
}

pub fn search(config: &MemoryConfig, request: &SearchRequest) -> Result<Vec<SearchHit>, StorageError> {
    MemoryStore::open_config(config)?.search(request)
}

pub fn fetch(config: &MemoryConfig, request: &FetchRequest) -> Result<Vec<Observation>, StorageError> {
    let ids = request.ids.resolve()?;
    MemoryStore::open_config(config)?.fetch_by_ids(&ids)
}

pub fn timeline(
    config: &MemoryConfig,
    request: &TimelineRequest,
) -> Result<Vec<Observation>, StorageError> {
    MemoryStore::open_config(config)?.timeline(request)
}

pub fn create(config: &MemoryConfig, observation: &NewObservation) -> Result<CreateResponse, StorageError> {
    let id = MemoryStore::open_config(config)?.create(observation)?;
    Ok(CreateResponse { id })
}

pub fn admin(config: &MemoryConfig, request: &AdminRequest) -> AdminReport {
    match MemoryStore::open_config(config) {
        Ok(store) => store.admin(request),
        Err(err) => {
            warn!("admin_store_unavailable: {err}");
            AdminReport::failed(request.operation.trim(), err)
        }
    }
}

pub fn sync(config: &MemoryConfig, request: &SyncRequest) -> SyncReport {
    SyncBridge::new(config.clone()).execute(request)
}

/// Dispatches one JSON request to `tool` and returns the JSON response.
/// Failures come back as values, never as `Err`.
pub fn call(tool: &str, payload: Value, config: &MemoryConfig) -> Value {
    let tool = match tool.parse::<Tool>() {
        Ok(tool) => tool,
        Err(err) => return error_envelope("validation", err),
    };
    debug!("tool_call: tool={tool}");

    match tool {
        Tool::Search => respond(parse(payload).and_then(|request| search(config, &request))),
        Tool::Fetch => respond(parse(payload).and_then(|request| fetch(config, &request))),
        Tool::Timeline => respond(parse(payload).and_then(|request| timeline(config, &request))),
        Tool::Create => respond(parse(payload).and_then(|request| create(config, &request))),
        Tool::Admin => match parse::<AdminRequest>(payload) {
            Ok(request) => to_value(&admin(config, &request)),
            Err(err) => error_envelope(error_kind(&err), err),
        },
        Tool::Sync => match parse::<SyncRequest>(payload) {
            Ok(request) => to_value(&sync(config, &request)),
            Err(err) => error_envelope(error_kind(&err), err),
        },
    }
}

pub fn error_kind(err: &StorageError) -> &'static str {
    match err {
        StorageError::Validation(_) => "validation",
        StorageError::Unavailable { .. } => "storage_unavailable",
        StorageError::QuerySyntax(_) => "query_syntax",
        _ => "storage",
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, StorageError> {
    serde_json::from_value(payload)
        .map_err(|err| ContractError::MalformedRequest(err.to_string()).into())
}

fn respond<T: Serialize>(result: Result<T, StorageError>) -> Value {
    match result {
        Ok(response) => to_value(&response),
        Err(err) => {
            debug!("tool_call_failed: kind={} {err}", error_kind(&err));
            error_envelope(error_kind(&err), err)
        }
    }
}

fn to_value<T: Serialize>(response: &T) -> Value {
    serde_json::to_value(response).unwrap_or_else(|err| error_envelope("storage", err))
}

fn error_envelope(kind: &str, message: impl fmt::Display) -> Value {
    json!({
        "error": {
            "kind": kind,
            "message": message.to_string(),
        }
    })
}
