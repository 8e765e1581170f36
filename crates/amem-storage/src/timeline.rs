use crate::{
    collect_rows, limit_param, observation_from_row, MemoryStore, StorageError,
    OBSERVATION_COLUMNS,
};
use amem_core::contracts::TimelineRequest;
use amem_core::Observation;
use rusqlite::{params, OptionalExtension};

impl MemoryStore {
    /// Up to `before` ids below the target, the target if it still exists and
    /// up to `after` ids above it, ascending. All three reads share one
    /// snapshot.
    pub fn timeline(&self, request: &TimelineRequest) -> Result<Vec<Observation>, StorageError> {
        let (before, after) = request.window();
        let tx = self.conn.unchecked_transaction()?;

        let mut earlier = {
            let sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id < ?1 ORDER BY id DESC LIMIT ?2"
            );
            let mut statement = tx.prepare(&sql)?;
            let rows = statement.query_map(
                params![request.id, limit_param(before)],
                observation_from_row,
            )?;
            collect_rows(rows)?
        };
        earlier.reverse();

        let target = tx
            .query_row(
                &format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"),
                [request.id],
                observation_from_row,
            )
            .optional()?;

        let later = {
            let sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
            );
            let mut statement = tx.prepare(&sql)?;
            let rows = statement.query_map(
                params![request.id, limit_param(after)],
                observation_from_row,
            )?;
            collect_rows(rows)?
        };
        tx.commit()?;

        let mut window = earlier;
        window.extend(target);
        window.extend(later);
        Ok(window)
    }
}
