use crate::SyncError;
use amem_core::ExternalTask;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const ISSUES_TABLE: &str = "issues";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only view of the external tracker's `issues` table. The tracker owns
/// the schema, so every column beyond `id` is looked up rather than assumed.
pub struct TaskStore {
    conn: Connection,
    path: PathBuf,
    columns: IssueColumns,
}

#[derive(Debug, Default)]
struct IssueColumns {
    id: bool,
    title: Option<&'static str>,
    description: Option<&'static str>,
    status: bool,
}

impl IssueColumns {
    fn has_status(&self) -> bool {
        self.id && self.status
    }
}

impl TaskStore {
    /// `Ok(None)` when no store file exists yet. The file is never created.
    pub fn open(path: impl AsRef<Path>) -> Result<Option<Self>, SyncError> {
        let path = path.as_ref();
        if !path.is_file() {
            debug!("task_store_absent: path={}", path.display());
            return Ok(None);
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| task_store_error(path, err))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| task_store_error(path, err))?;
        conn.pragma_update(None, "query_only", true)
            .map_err(|err| task_store_error(path, err))?;

        let columns = issue_columns(&conn).map_err(|err| task_store_error(path, err))?;
        if !columns.has_status() {
            warn!("task_store_schema_unrecognized: path={}", path.display());
        }

        Ok(Some(Self {
            conn,
            path: path.to_path_buf(),
            columns,
        }))
    }

    /// Tasks whose status is `done` or `closed`, ordered by id.
    pub fn completed_tasks(&self) -> Result<Vec<ExternalTask>, SyncError> {
        if !self.columns.has_status() {
            return Ok(Vec::new());
        }

        let title = self.columns.title.unwrap_or("id");
        let description = self.columns.description.unwrap_or("NULL");
        let sql = format!(
            "
            SELECT id, {title}, {description}, status
            FROM {ISSUES_TABLE}
            WHERE lower(trim(status)) IN ('done', 'closed')
            ORDER BY id ASC
            "
        );

        let mut statement = self.conn.prepare(&sql).map_err(|err| self.error(err))?;
        let rows = statement
            .query_map([], |row| {
                Ok(ExternalTask {
                    id: text_column(row, 0)?,
                    title: text_column(row, 1)?,
                    description: row
                        .get::<_, Option<String>>(2)?
                        .map(|text| text.trim().to_string())
                        .filter(|text| !text.is_empty()),
                    status: text_column(row, 3)?,
                })
            })
            .map_err(|err| self.error(err))?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|err| self.error(err))?);
        }
        Ok(tasks)
    }

    pub fn task_exists(&self, id: &str) -> Result<bool, SyncError> {
        if !self.columns.id {
            return Ok(false);
        }
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {ISSUES_TABLE} WHERE id = ?1 LIMIT 1"),
                [id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|err| self.error(err))?;
        Ok(found.is_some())
    }

    /// Tasks with a status other than `closed`. Rows without a status are
    /// not counted.
    pub fn active_task_count(&self) -> Result<i64, SyncError> {
        if !self.columns.has_status() {
            return Ok(0);
        }
        self.conn
            .query_row(
                &format!(
                    "
                    SELECT COUNT(*)
                    FROM {ISSUES_TABLE}
                    WHERE status IS NOT NULL AND lower(trim(status)) <> 'closed'
                    "
                ),
                [],
                |row| row.get(0),
            )
            .map_err(|err| self.error(err))
    }

    fn error(&self, err: rusqlite::Error) -> SyncError {
        task_store_error(&self.path, err)
    }
}

fn issue_columns(conn: &Connection) -> rusqlite::Result<IssueColumns> {
    let mut statement = conn.prepare(&format!("PRAGMA table_info({ISSUES_TABLE})"))?;
    let names = statement.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = IssueColumns::default();
    for name in names {
        match name?.as_str() {
            "id" => columns.id = true,
            "title" => columns.title = Some("title"),
            "t" if columns.title.is_none() => columns.title = Some("t"),
            "description" => columns.description = Some("description"),
            "desc" if columns.description.is_none() => columns.description = Some("\"desc\""),
            "status" => columns.status = true,
            _ => {}
        }
    }
    Ok(columns)
}

fn text_column(row: &Row<'_>, index: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

fn task_store_error(path: &Path, source: rusqlite::Error) -> SyncError {
    SyncError::TaskStore {
        path: path.display().to_string(),
        source,
    }
}
