//! SQLite-backed script and execution store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{
    CreateScriptRequest, Execution, ExecutionFilter, ExecutionOutcome, ExecutionStatus,
    ExecutionStore, NewExecution, Script, ScriptStore, StoreError, UpdateScriptRequest,
};

const EXECUTION_COLUMNS: &str = "e.id, e.script_id, e.status, e.started_at, e.finished_at, \
     e.request_args, e.response_data, e.logs, e.screenshot_url";

const SCRIPT_COLUMNS: &str =
    "id, owner, name, code, created_at, updated_at, last_executed_at";

/// SQLite store holding both saved scripts and their executions.
///
/// One connection behind a mutex; every operation is a short critical section.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                code TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_executed_at TEXT,
                UNIQUE (owner, name)
            );

            CREATE TABLE IF NOT EXISTS script_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                script_id INTEGER REFERENCES scripts(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                request_args TEXT NOT NULL,
                response_data TEXT,
                logs TEXT NOT NULL DEFAULT '',
                screenshot_url TEXT,
                CHECK ((status IN ('success', 'error')) = (finished_at IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_scripts_owner ON scripts(owner);
            CREATE INDEX IF NOT EXISTS idx_executions_script_id ON script_executions(script_id);
            CREATE INDEX IF NOT EXISTS idx_executions_started_at ON script_executions(started_at);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_script(row: &rusqlite::Row) -> rusqlite::Result<Script> {
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;
        let last_executed_at: Option<String> = row.get(6)?;

        Ok(Script {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            code: row.get(3)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            last_executed_at: last_executed_at.as_deref().map(parse_timestamp),
        })
    }

    fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<Execution> {
        let status: String = row.get(2)?;
        let started_at: String = row.get(3)?;
        let finished_at: Option<String> = row.get(4)?;
        let request_args: String = row.get(5)?;
        let response_data: Option<String> = row.get(6)?;

        let status = status.parse::<ExecutionStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Execution {
            id: row.get(0)?,
            script_id: row.get(1)?,
            status,
            started_at: parse_timestamp(&started_at),
            finished_at: finished_at.as_deref().map(parse_timestamp),
            request_args: serde_json::from_str(&request_args)
                .unwrap_or(serde_json::Value::Object(Default::default())),
            response_data: response_data.and_then(|json| serde_json::from_str(&json).ok()),
            logs: row.get(7)?,
            screenshot_url: row.get(8)?,
        })
    }

    fn get_script_locked(
        conn: &Connection,
        id: i64,
        owner: &str,
    ) -> Result<Option<Script>, StoreError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM scripts WHERE id = ? AND owner = ?",
                SCRIPT_COLUMNS
            ),
            params![id, owner],
            Self::row_to_script,
        )
        .optional()
        .map_err(db_err)
    }

    fn get_execution_locked(conn: &Connection, id: i64) -> Result<Option<Execution>, StoreError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM script_executions e WHERE e.id = ?",
                EXECUTION_COLUMNS
            ),
            params![id],
            Self::row_to_execution,
        )
        .optional()
        .map_err(db_err)
    }

    fn build_execution_where(
        filter: &ExecutionFilter,
    ) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(script_id) = filter.script_id {
            conditions.push("e.script_id = ?");
            params.push(Box::new(script_id));
        }

        if let Some(ref owner) = filter.owner {
            conditions.push("s.owner = ?");
            params.push(Box::new(owner.clone()));
        }

        if let Some(status) = filter.status {
            conditions.push("e.status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl ScriptStore for SqliteStore {
    fn create(&self, request: CreateScriptRequest) -> Result<Script, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO scripts (owner, name, code, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![
                request.owner,
                request.name,
                request.code,
                format_timestamp(&now),
                format_timestamp(&now),
            ],
        )
        .map_err(|e| conflict_or_db(e, &request.name))?;

        Ok(Script {
            id: conn.last_insert_rowid(),
            owner: request.owner,
            name: request.name,
            code: request.code,
            created_at: now,
            updated_at: now,
            last_executed_at: None,
        })
    }

    fn get_owned(&self, id: i64, owner: &str) -> Result<Option<Script>, StoreError> {
        let conn = self.lock()?;
        Self::get_script_locked(&conn, id, owner)
    }

    fn list(&self, owner: &str, limit: i64, offset: i64) -> Result<Vec<Script>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM scripts WHERE owner = ? ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
                SCRIPT_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![owner, limit, offset], Self::row_to_script)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, owner: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM scripts WHERE owner = ?",
            params![owner],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn update(
        &self,
        id: i64,
        owner: &str,
        request: UpdateScriptRequest,
    ) -> Result<Script, StoreError> {
        let conn = self.lock()?;
        let mut script = Self::get_script_locked(&conn, id, owner)?.ok_or(StoreError::NotFound {
            entity: "Script",
            id,
        })?;

        if let Some(name) = request.name {
            script.name = name;
        }
        if let Some(code) = request.code {
            script.code = code;
        }
        script.updated_at = Utc::now();

        conn.execute(
            "UPDATE scripts SET name = ?, code = ?, updated_at = ? WHERE id = ?",
            params![
                script.name,
                script.code,
                format_timestamp(&script.updated_at),
                id
            ],
        )
        .map_err(|e| conflict_or_db(e, &script.name))?;

        Ok(script)
    }

    fn delete(&self, id: i64, owner: &str) -> Result<Script, StoreError> {
        let conn = self.lock()?;
        let script = Self::get_script_locked(&conn, id, owner)?.ok_or(StoreError::NotFound {
            entity: "Script",
            id,
        })?;

        conn.execute("DELETE FROM scripts WHERE id = ?", params![id])
            .map_err(db_err)?;

        Ok(script)
    }

    fn touch_last_executed(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE scripts SET last_executed_at = ? WHERE id = ?",
                params![format_timestamp(&at), id],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "Script",
                id,
            });
        }
        Ok(())
    }
}

impl ExecutionStore for SqliteStore {
    fn create(&self, request: NewExecution) -> Result<Execution, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let args_json = serde_json::to_string(&request.request_args)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO script_executions (script_id, status, started_at, request_args) VALUES (?, ?, ?, ?)",
            params![
                request.script_id,
                ExecutionStatus::Pending.as_str(),
                format_timestamp(&now),
                args_json,
            ],
        )
        .map_err(db_err)?;

        Ok(Execution {
            id: conn.last_insert_rowid(),
            script_id: request.script_id,
            status: ExecutionStatus::Pending,
            started_at: now,
            finished_at: None,
            request_args: request.request_args,
            response_data: None,
            logs: String::new(),
            screenshot_url: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Execution>, StoreError> {
        let conn = self.lock()?;
        Self::get_execution_locked(&conn, id)
    }

    fn mark_running(&self, id: i64) -> Result<Execution, StoreError> {
        let conn = self.lock()?;
        let mut execution = Self::get_execution_locked(&conn, id)?.ok_or(StoreError::NotFound {
            entity: "Execution",
            id,
        })?;

        match execution.status {
            ExecutionStatus::Running => return Ok(execution),
            ExecutionStatus::Pending => {}
            from => {
                return Err(StoreError::InvalidTransition {
                    id,
                    from,
                    to: ExecutionStatus::Running,
                })
            }
        }

        conn.execute(
            "UPDATE script_executions SET status = ?, finished_at = NULL WHERE id = ?",
            params![ExecutionStatus::Running.as_str(), id],
        )
        .map_err(db_err)?;

        execution.status = ExecutionStatus::Running;
        execution.finished_at = None;
        Ok(execution)
    }

    fn finish(
        &self,
        id: i64,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
    ) -> Result<Execution, StoreError> {
        let conn = self.lock()?;
        let mut execution = Self::get_execution_locked(&conn, id)?.ok_or(StoreError::NotFound {
            entity: "Execution",
            id,
        })?;

        if !status.is_terminal() || execution.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: execution.status,
                to: status,
            });
        }

        let finished_at = Utc::now();
        let response_json = outcome
            .response_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        conn.execute(
            "UPDATE script_executions SET status = ?, finished_at = ?, response_data = ?, logs = ?, screenshot_url = COALESCE(?, screenshot_url) WHERE id = ?",
            params![
                status.as_str(),
                format_timestamp(&finished_at),
                response_json,
                outcome.logs,
                outcome.screenshot_url,
                id,
            ],
        )
        .map_err(db_err)?;

        execution.status = status;
        execution.finished_at = Some(finished_at);
        execution.response_data = outcome.response_data;
        execution.logs = outcome.logs;
        if outcome.screenshot_url.is_some() {
            execution.screenshot_url = outcome.screenshot_url;
        }
        Ok(execution)
    }

    fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let conn = self.lock()?;
        let (where_clause, mut params) = Self::build_execution_where(filter);

        let sql = format!(
            "SELECT {} FROM script_executions e LEFT JOIN scripts s ON s.id = e.script_id {} ORDER BY e.started_at DESC, e.id DESC LIMIT ? OFFSET ?",
            EXECUTION_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_execution)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &ExecutionFilter) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let (where_clause, params) = Self::build_execution_where(filter);

        let sql = format!(
            "SELECT COUNT(*) FROM script_executions e LEFT JOIN scripts s ON s.id = e.script_id {}",
            where_clause
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn conflict_or_db(e: rusqlite::Error, name: &str) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            StoreError::Conflict(format!("a script named '{}' already exists", name))
        }
        _ => db_err(e),
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
