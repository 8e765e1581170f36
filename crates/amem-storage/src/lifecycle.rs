use crate::{format_timestamp, search, MemoryStore, StorageError};
use amem_core::contracts::{AdminDetails, AdminOperation, AdminReport, AdminRequest, TypeCount};
use amem_core::ContractError;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub total_observations: i64,
    pub by_type: Vec<TypeCount>,
    pub expired_observations: i64,
    pub indexed_observations: i64,
    pub schema_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub cutoff: DateTime<Utc>,
    pub matched: i64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumOutcome {
    pub previous_size_bytes: u64,
    pub db_size_bytes: u64,
}

impl MemoryStore {
    /// Runs one maintenance operation. Failures, including an unknown
    /// operation name, come back as `success: false` reports.
    pub fn admin(&self, request: &AdminRequest) -> AdminReport {
        let operation = match request.parsed_operation() {
            Ok(operation) => operation,
            Err(err) => {
                warn!("admin_rejected: {err}");
                return AdminReport::failed(request.operation.trim(), err);
            }
        };

        let details = match operation {
            AdminOperation::Status => self.status().map(|status| AdminDetails::Status {
                total_observations: status.total_observations,
                by_type: status.by_type,
                expired_observations: status.expired_observations,
                indexed_observations: status.indexed_observations,
                schema_version: status.schema_version,
            }),
            AdminOperation::Archive => self
                .archive(request.archive_age_days(), request.dry_run)
                .map(|outcome| {
                    if outcome.dry_run {
                        AdminDetails::ArchivePreview {
                            would_archive: outcome.matched,
                            cutoff_date: outcome.cutoff,
                        }
                    } else {
                        AdminDetails::Archived {
                            archived: outcome.matched,
                            cutoff_date: outcome.cutoff,
                        }
                    }
                }),
            AdminOperation::Checkpoint => self.checkpoint().map(|path| AdminDetails::Checkpoint {
                checkpoint_path: path.display().to_string(),
            }),
            AdminOperation::Vacuum => self.vacuum().map(|outcome| AdminDetails::Vacuum {
                db_size_bytes: outcome.db_size_bytes,
                previous_size_bytes: outcome.previous_size_bytes,
            }),
            AdminOperation::Migrate => self.migrate_details(),
        };

        match details {
            Ok(details) => AdminReport::ok(operation, details),
            Err(err) => {
                warn!("admin_failed: operation={operation} {err}");
                AdminReport::failed(operation.as_str(), err)
            }
        }
    }

    pub fn status(&self) -> Result<StoreStatus, StorageError> {
        let now = format_timestamp(Utc::now());
        let expired_observations = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM observations
            WHERE expires_at IS NOT NULL AND expires_at < ?1
            ",
            [now],
            |row| row.get(0),
        )?;

        Ok(StoreStatus {
            total_observations: self.count()?,
            by_type: self.count_by_type()?,
            expired_observations,
            indexed_observations: self.indexed_count()?,
            schema_version: self.schema_version()?,
        })
    }

    pub fn archive(&self, older_than_days: u32, dry_run: bool) -> Result<ArchiveOutcome, StorageError> {
        let cutoff = Duration::try_days(i64::from(older_than_days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or(ContractError::ArchiveAgeOutOfRange(older_than_days))?;
        self.archive_before(cutoff, dry_run)
    }

    /// Deletes every observation created before `cutoff`, together with its
    /// index entry, in one transaction. With `dry_run` only counts them.
    pub fn archive_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<ArchiveOutcome, StorageError> {
        let cutoff_text = format_timestamp(cutoff);

        if dry_run {
            let matched = self.conn.query_row(
                "SELECT COUNT(*) FROM observations WHERE created_at < ?1",
                [&cutoff_text],
                |row| row.get(0),
            )?;
            return Ok(ArchiveOutcome {
                cutoff,
                matched,
                dry_run,
            });
        }

        let tx = self.write_transaction()?;
        let unindexed = search::unindex_created_before(&tx, &cutoff_text)?;
        let removed = tx.execute(
            "DELETE FROM observations WHERE created_at < ?1",
            [&cutoff_text],
        )?;
        tx.commit()?;

        if unindexed != removed {
            warn!("archive_index_mismatch: rows={removed} index_entries={unindexed}");
        }
        info!("archive_applied: removed={removed} cutoff={cutoff_text}");
        Ok(ArchiveOutcome {
            cutoff,
            matched: removed as i64,
            dry_run,
        })
    }

    /// Writes a consistent copy of the live database next to it. The copy is
    /// produced under a temporary name and renamed into place.
    pub fn checkpoint(&self) -> Result<PathBuf, StorageError> {
        let dir = self
            .memory_dir()
            .ok_or_else(|| StorageError::Unavailable {
                path: ":memory:".to_string(),
                reason: "checkpoint requires a file-backed store".to_string(),
            })?
            .to_path_buf();

        let stamp = Utc::now().timestamp_millis();
        let mut target = dir.join(format!("checkpoint-{stamp}.db"));
        let mut suffix = 1;
        while target.exists() {
            target = dir.join(format!("checkpoint-{stamp}-{suffix}.db"));
            suffix += 1;
        }

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("checkpoint-{stamp}.db"));
        let temp_path = dir.join(format!(".{file_name}.tmp"));
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }
        let temp_text = temp_path.to_str().ok_or_else(|| StorageError::Unavailable {
            path: temp_path.display().to_string(),
            reason: "checkpoint path is not valid UTF-8".to_string(),
        })?;

        if let Err(err) = self.conn.execute("VACUUM INTO ?1", [temp_text]) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        fs::rename(&temp_path, &target)?;

        info!("checkpoint_written: path={}", target.display());
        Ok(target)
    }

    pub fn vacuum(&self) -> Result<VacuumOutcome, StorageError> {
        let previous_size_bytes = self.allocated_bytes()?;
        self.conn.execute_batch("VACUUM")?;
        if self.db_path.is_some() {
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        let db_size_bytes = self.allocated_bytes()?;
        info!("vacuum_complete: before={previous_size_bytes} after={db_size_bytes}");
        Ok(VacuumOutcome {
            previous_size_bytes,
            db_size_bytes,
        })
    }

    fn migrate_details(&self) -> Result<AdminDetails, StorageError> {
        let from_version = self.schema_version()?;
        let applied = self.migrate()?;
        Ok(AdminDetails::Migrate {
            from_version,
            to_version: self.schema_version()?,
            applied,
        })
    }

    fn allocated_bytes(&self) -> Result<u64, StorageError> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amem_core::contracts::SearchRequest;
    use amem_core::{NewObservation, ObservationType};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn old_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn status_reports_totals_types_and_expired() {
        let store = MemoryStore::open_in_memory().expect("open db");
        store
            .create(
                &NewObservation::new(ObservationType::Blocker, "waiting on review")
                    .with_expires_at(old_ts()),
            )
            .expect("create");
        store
            .create(&NewObservation::new(ObservationType::Progress, "landed parser"))
            .expect("create");

        let report = store.admin(&AdminRequest::new(AdminOperation::Status));
        assert!(report.success);
        assert_eq!(report.operation, "status");
        match report.details {
            AdminDetails::Status {
                total_observations,
                by_type,
                expired_observations,
                indexed_observations,
                schema_version,
            } => {
                assert_eq!(total_observations, 2);
                assert_eq!(by_type.len(), 2);
                assert_eq!(expired_observations, 1);
                assert_eq!(indexed_observations, 2);
                assert_eq!(schema_version, crate::MEMORY_SCHEMA_VERSION);
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn archive_dry_run_counts_without_deleting() {
        let store = MemoryStore::open_in_memory().expect("open db");
        store
            .create_at(&NewObservation::new(ObservationType::Learning, "ancient"), old_ts())
            .expect("create");
        store
            .create(&NewObservation::new(ObservationType::Learning, "recent"))
            .expect("create");

        let report = store.admin(&AdminRequest::archive(90, true));
        assert!(report.success);
        assert!(matches!(
            report.details,
            AdminDetails::ArchivePreview { would_archive: 1, .. }
        ));
        assert_eq!(store.count().expect("count"), 2);

        let report = store.admin(&AdminRequest::archive(90, false));
        assert!(matches!(
            report.details,
            AdminDetails::Archived { archived: 1, .. }
        ));
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.index_consistent().expect("consistent"));
    }

    #[test]
    fn archive_age_past_the_calendar_is_a_failed_report() {
        let store = MemoryStore::open_in_memory().expect("open db");
        store
            .create(&NewObservation::new(ObservationType::Learning, "stays"))
            .expect("create");

        let report = store.admin(&AdminRequest::archive(100_000_000, true));
        assert!(!report.success);
        assert!(matches!(report.details, AdminDetails::Error { .. }));

        assert!(matches!(
            store.archive(u32::MAX, false),
            Err(StorageError::Validation(ContractError::ArchiveAgeOutOfRange(u32::MAX)))
        ));
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn archive_with_zero_days_removes_everything_already_written() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let id = store
            .create(&NewObservation::new(ObservationType::Decision, "quokka pattern"))
            .expect("create");

        let report = store.admin(&AdminRequest::archive(0, false));
        assert!(report.success);
        assert!(store.fetch(id).expect("fetch").is_none());
        assert!(store
            .search(&SearchRequest::new("quokka"))
            .expect("search")
            .is_empty());
    }

    #[test]
    fn checkpoint_writes_independent_snapshot() {
        let dir = tempdir().expect("temp dir");
        let store = MemoryStore::open(dir.path().join("memory.db")).expect("open");
        store
            .create(&NewObservation::new(ObservationType::Handoff, "snapshot me"))
            .expect("create");

        let path = store.checkpoint().expect("checkpoint");
        assert!(path.exists());
        assert_ne!(Some(path.as_path()), store.db_path());
        assert!(path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("checkpoint-") && name.ends_with(".db")));

        store
            .create(&NewObservation::new(ObservationType::Handoff, "after snapshot"))
            .expect("live store still writable");
        assert_eq!(store.count().expect("count"), 2);

        let snapshot = MemoryStore::open(&path).expect("open snapshot");
        assert_eq!(snapshot.count().expect("snapshot count"), 1);
        assert_eq!(
            snapshot
                .search(&SearchRequest::new("snapshot"))
                .expect("snapshot search")
                .len(),
            1
        );

        let leftovers = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn checkpoint_of_in_memory_store_reports_failure() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let report = store.admin(&AdminRequest::new(AdminOperation::Checkpoint));
        assert!(!report.success);
        assert!(matches!(report.details, AdminDetails::Error { .. }));
    }

    #[test]
    fn vacuum_keeps_live_rows_and_does_not_grow() {
        let dir = tempdir().expect("temp dir");
        let store = MemoryStore::open(dir.path().join("memory.db")).expect("open");
        for index in 0..200 {
            store
                .create_at(
                    &NewObservation::new(ObservationType::Learning, "x".repeat(512))
                        .with_facts(vec![format!("fact {index}")]),
                    old_ts(),
                )
                .expect("create");
        }
        store
            .create(&NewObservation::new(ObservationType::Learning, "survivor"))
            .expect("create");
        store.archive_before(old_ts() + Duration::days(1), false).expect("archive");
        let count_before = store.count().expect("count");

        let outcome = store.vacuum().expect("vacuum");
        assert_eq!(store.count().expect("count"), count_before);
        assert!(outcome.db_size_bytes <= outcome.previous_size_bytes);
    }

    #[test]
    fn migrate_without_pending_steps_is_a_successful_no_op() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let report = store.admin(&AdminRequest::new(AdminOperation::Migrate));
        assert!(report.success);
        assert_eq!(
            report.details,
            AdminDetails::Migrate {
                from_version: crate::MEMORY_SCHEMA_VERSION,
                to_version: crate::MEMORY_SCHEMA_VERSION,
                applied: Vec::new(),
            }
        );
    }

    #[test]
    fn unknown_operation_is_reported_not_raised() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let report = store.admin(&AdminRequest {
            operation: "defrag".to_string(),
            older_than_days: None,
            dry_run: false,
        });
        assert!(!report.success);
        assert_eq!(report.operation, "defrag");
    }
}
