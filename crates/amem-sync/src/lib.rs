use amem_core::contracts::{SyncDetails, SyncOperation, SyncReport, SyncRequest};
use amem_core::{ContractError, ExternalTask, MemoryConfig, NewObservation, ObservationId, ObservationType};
use amem_storage::{MemoryStore, StorageError};
use thiserror::Error;
use tracing::{debug, info, warn};

mod task_store;

pub use task_store::TaskStore;

pub const TASK_SYNC_CONCEPT: &str = "task-sync";

/// Observation types whose task links `sync_from_memory` verifies.
pub const LINK_CHECKED_TYPES: [ObservationType; 2] =
    [ObservationType::Blocker, ObservationType::Decision];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("task store error at {path}: {source}")]
    TaskStore {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("validation error: {0}")]
    Validation(#[from] ContractError),
}

/// Reconciles the memory store with the external task store. Holds only
/// paths; both stores are opened inside each call and closed before it
/// returns.
#[derive(Debug, Clone)]
pub struct SyncBridge {
    config: MemoryConfig,
}

impl SyncBridge {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn execute(&self, request: &SyncRequest) -> SyncReport {
        let operation = match request.parsed_operation() {
            Ok(operation) => operation,
            Err(err) => {
                warn!("sync_rejected: {err}");
                return SyncReport::failed(request.operation.trim());
            }
        };

        let details = match operation {
            SyncOperation::SyncToMemory => self.sync_to_memory(),
            SyncOperation::SyncFromMemory => self.sync_from_memory(),
            SyncOperation::Link => match (request.observation_id, request.bead_id.as_deref()) {
                (Some(observation_id), Some(bead_id)) => self.link(observation_id, bead_id),
                (None, _) => Err(ContractError::MissingField("observationId").into()),
                (_, None) => Err(ContractError::MissingField("beadId").into()),
            },
            SyncOperation::Status => self.status(),
        };

        match details {
            Ok(details) => SyncReport::ok(operation, details),
            Err(err) => {
                warn!("sync_failed: operation={operation} {err}");
                SyncReport::failed(operation.as_str())
            }
        }
    }

    /// Records one progress observation per completed external task. Tasks
    /// that already have one are skipped, so repeated runs add nothing.
    pub fn sync_to_memory(&self) -> Result<SyncDetails, SyncError> {
        let Some(completed) = self.with_task_store(|tasks| tasks.completed_tasks())? else {
            return Ok(SyncDetails {
                tasks_synced: Some(0),
                task_store_present: Some(false),
                ..SyncDetails::default()
            });
        };

        let store = self.open_memory()?;
        let mut synced = 0usize;
        for task in &completed {
            if store.create_once_per_task(&synced_observation(task))?.is_some() {
                synced += 1;
            }
        }

        info!(
            "tasks_synced: synced={synced} completed={}",
            completed.len()
        );
        Ok(SyncDetails {
            tasks_synced: Some(synced),
            task_store_present: Some(true),
            ..SyncDetails::default()
        })
    }

    /// Counts blocker and decision observations whose task still exists.
    /// Neither store is modified.
    pub fn sync_from_memory(&self) -> Result<SyncDetails, SyncError> {
        let linked = {
            let store = self.open_memory()?;
            store.task_linked_observations(&LINK_CHECKED_TYPES)?
        };

        let confirmed = self.with_task_store(|tasks| {
            let mut confirmed = 0usize;
            for observation in &linked {
                let Some(bead_id) = observation.bead_id.as_deref() else {
                    continue;
                };
                if tasks.task_exists(bead_id)? {
                    confirmed += 1;
                } else {
                    debug!(
                        "task_link_dangling: observation={} bead_id={bead_id}",
                        observation.id
                    );
                }
            }
            Ok(confirmed)
        })?;

        Ok(SyncDetails {
            observations_linked: Some(confirmed.unwrap_or(0)),
            task_store_present: Some(confirmed.is_some()),
            ..SyncDetails::default()
        })
    }

    /// Points an observation at an external task. The task is not required
    /// to exist; an unknown observation links nothing.
    pub fn link(&self, observation_id: ObservationId, bead_id: &str) -> Result<SyncDetails, SyncError> {
        let store = self.open_memory()?;
        let linked = store.set_bead_id(observation_id, bead_id)?;
        if linked {
            info!("observation_linked: observation={observation_id} bead_id={}", bead_id.trim());
        } else {
            debug!("observation_link_skipped: observation={observation_id} not found");
        }
        Ok(SyncDetails {
            observations_linked: Some(usize::from(linked)),
            ..SyncDetails::default()
        })
    }

    pub fn status(&self) -> Result<SyncDetails, SyncError> {
        let memory_count = self.open_memory()?.count()?;
        let active_tasks = self.with_task_store(|tasks| tasks.active_task_count())?;

        Ok(SyncDetails {
            memory_count: Some(memory_count),
            active_tasks: Some(active_tasks.unwrap_or(0)),
            task_store_present: Some(active_tasks.is_some()),
            ..SyncDetails::default()
        })
    }

    fn open_memory(&self) -> Result<MemoryStore, SyncError> {
        Ok(MemoryStore::open_config(&self.config)?)
    }

    /// Runs `read` against the task store if it exists. The handle is dropped
    /// before this returns.
    fn with_task_store<T>(
        &self,
        read: impl FnOnce(&TaskStore) -> Result<T, SyncError>,
    ) -> Result<Option<T>, SyncError> {
        match TaskStore::open(self.config.beads_db_path())? {
            Some(tasks) => read(&tasks).map(Some),
            None => Ok(None),
        }
    }
}

fn synced_observation(task: &ExternalTask) -> NewObservation {
    let facts = task.description.iter().cloned().collect();
    NewObservation::new(ObservationType::Progress, task.title.clone())
        .with_facts(facts)
        .with_concepts(vec![TASK_SYNC_CONCEPT.to_string()])
        .with_bead_id(task.id.clone())
}
