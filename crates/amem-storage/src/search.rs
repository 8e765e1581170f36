use crate::{kind_column, limit_param, timestamp_column, MemoryStore, StorageError};
use amem_core::contracts::{SearchHit, SearchRequest};
use amem_core::{ContractError, ObservationId, ObservationType};
use rusqlite::{params, Connection};
use tracing::{info, warn};

// The mirror holds only columns that are immutable after insert, so only
// inserts and deletes on `observations` need a matching index write.

pub(crate) fn index_observation(
    conn: &Connection,
    id: ObservationId,
    kind: ObservationType,
    narrative: &str,
    facts_json: &str,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO observations_fts (rowid, type, narrative, facts) VALUES (?1, ?2, ?3, ?4)",
        params![id, kind.as_str(), narrative, facts_json],
    )?;
    Ok(())
}

pub(crate) fn unindex_created_before(conn: &Connection, cutoff: &str) -> Result<usize, StorageError> {
    Ok(conn.execute(
        "
        DELETE FROM observations_fts
        WHERE rowid IN (SELECT id FROM observations WHERE created_at < ?1)
        ",
        [cutoff],
    )?)
}

impl MemoryStore {
    /// Full-text search over type, narrative and facts. Ranked by confidence,
    /// then newest first.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, StorageError> {
        if request.query.trim().is_empty() {
            return Err(ContractError::BlankQuery.into());
        }

        let kind = request.kind.map(|kind| kind.as_str());
        let mut statement = self.conn.prepare(
            "
            SELECT o.id, o.type, o.narrative, o.confidence, o.created_at
            FROM observations_fts
            JOIN observations o ON o.id = observations_fts.rowid
            WHERE observations_fts MATCH ?1
              AND (?2 IS NULL OR o.type = ?2)
            ORDER BY o.confidence DESC, o.created_at DESC, o.id DESC
            LIMIT ?3
            ",
        )?;

        let rows = statement
            .query_map(
                params![request.query, kind, limit_param(request.limit())],
                |row| {
                    Ok(SearchHit {
                        id: row.get(0)?,
                        kind: kind_column(row, 1)?,
                        narrative: row.get(2)?,
                        confidence: row.get(3)?,
                        created_at: timestamp_column(row, 4)?,
                    })
                },
            )
            .map_err(classify_match_error)?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.map_err(classify_match_error)?);
        }
        Ok(hits)
    }

    pub fn indexed_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM observations_fts", [], |row| row.get(0))?)
    }

    /// True when the mirror holds exactly the live observation ids.
    pub fn index_consistent(&self) -> Result<bool, StorageError> {
        let missing: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM observations o
            WHERE NOT EXISTS (SELECT 1 FROM observations_fts f WHERE f.rowid = o.id)
            ",
            [],
            |row| row.get(0),
        )?;
        let orphaned: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM observations_fts f
            WHERE NOT EXISTS (SELECT 1 FROM observations o WHERE o.id = f.rowid)
            ",
            [],
            |row| row.get(0),
        )?;
        if missing > 0 || orphaned > 0 {
            warn!("search_index_drift: missing={missing} orphaned={orphaned}");
        }
        Ok(missing == 0 && orphaned == 0)
    }

    /// Repopulates the mirror from the table in one transaction.
    pub fn rebuild_index(&self) -> Result<i64, StorageError> {
        let tx = self.write_transaction()?;
        tx.execute("DELETE FROM observations_fts", [])?;
        let indexed = tx.execute(
            "
            INSERT INTO observations_fts (rowid, type, narrative, facts)
            SELECT id, type, narrative, COALESCE(facts, '[]') FROM observations
            ",
            [],
        )?;
        tx.commit()?;
        info!("search_index_rebuilt: rows={indexed}");
        Ok(indexed as i64)
    }
}

fn classify_match_error(err: rusqlite::Error) -> StorageError {
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        _ => return StorageError::Sqlite(err),
    };
    let lowered = message.to_lowercase();
    if lowered.contains("fts5")
        || lowered.contains("syntax error")
        || lowered.contains("unterminated string")
        || lowered.contains("no such column")
        || lowered.contains("unknown special query")
    {
        StorageError::QuerySyntax(message)
    } else {
        StorageError::Sqlite(err)
    }
}
