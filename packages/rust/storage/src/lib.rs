//! Turso Embedded / libSQL task store (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per
//! pipeline task. It is the single source of truth for task status, phase,
//! progress and output, and implements the [`TaskStore`] contract the
//! workers are written against. A second table keeps one metadata row per
//! session, refreshed whenever one of its tasks finishes.
//!
//! **Write rules:** exactly one worker owns a task id at a time, so
//! [`TaskStore::transition`] is a plain read-modify-write with
//! last-writer-wins semantics.

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use variantflow_shared::{
    Result, SessionMetadata, SessionUpdate, Task, TaskContext, TaskId, TaskKind, TaskProgress,
    TaskStatus, TaskUpdate, VariantFlowError,
};

/// Durable task state: create once, transition many times, read anywhere.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Record a new `pending` task. Fails if the id already exists.
    async fn create(
        &self,
        id: &TaskId,
        kind: TaskKind,
        context: &TaskContext,
        input_artifact: &str,
    ) -> Result<Task>;

    /// Apply a partial update. Rejects moves out of a terminal status and a
    /// `completed` status without an output artifact reference.
    async fn transition(&self, id: &TaskId, update: TaskUpdate) -> Result<Task>;

    /// Fetch a task, or [`VariantFlowError::NotFound`].
    async fn read(&self, id: &TaskId) -> Result<Task>;

    /// Fold a finished task into its session's metadata record, creating the
    /// record on first use.
    async fn record_session(
        &self,
        context: &TaskContext,
        update: SessionUpdate,
    ) -> Result<SessionMetadata>;

    /// Metadata for a session, `None` until one of its tasks has finished.
    async fn read_session(&self, session_id: &str) -> Result<Option<SessionMetadata>>;
}

/// Primary storage handle wrapping a libSQL connection.
pub struct Storage {
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VariantFlowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        let storage = Self {
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database read-only (status views).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VariantFlowError::not_found(format!(
                "task database {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        Ok(Self {
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        VariantFlowError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(VariantFlowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task queries
    // -----------------------------------------------------------------------

    /// Fetch a task by id, `None` if absent.
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.as_str()],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(VariantFlowError::Storage(e.to_string())),
        }
    }

    /// All tasks of a session, oldest first.
    pub async fn list_tasks_for_session(&self, session_id: &str) -> Result<Vec<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = ?1 ORDER BY created_at, id"
                ),
                params![session_id],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    /// Most recently updated tasks across all sessions.
    pub async fn list_recent_tasks(&self, limit: u32) -> Result<Vec<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY updated_at DESC LIMIT ?1"),
                params![limit],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    /// Write every mutable column of `task`.
    async fn write_task(&self, task: &Task) -> Result<()> {
        let progress_json = task
            .progress
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;
        let output_json = task
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "UPDATE tasks SET
                   status = ?1,
                   phase = ?2,
                   output_artifact = ?3,
                   progress_json = ?4,
                   error = ?5,
                   output_json = ?6,
                   updated_at = ?7
                 WHERE id = ?8",
                params![
                    task.status.as_str(),
                    task.phase.as_deref(),
                    task.output_artifact.as_deref(),
                    progress_json,
                    task.error.as_deref(),
                    output_json,
                    task.updated_at.to_rfc3339(),
                    task.id.as_str(),
                ],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for Storage {
    async fn create(
        &self,
        id: &TaskId,
        kind: TaskKind,
        context: &TaskContext,
        input_artifact: &str,
    ) -> Result<Task> {
        self.check_writable()?;

        if self.get_task(id).await?.is_some() {
            return Err(VariantFlowError::validation(format!(
                "task {id} already exists"
            )));
        }

        let now = Utc::now();
        let context_json =
            serde_json::to_string(context).map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO tasks (id, kind, status, context_json, input_artifact, session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.as_str(),
                    kind.as_str(),
                    TaskStatus::Pending.as_str(),
                    context_json,
                    input_artifact,
                    context.session_id.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        tracing::debug!(task_id = %id, %kind, "task created");

        Ok(Task {
            id: id.clone(),
            kind,
            status: TaskStatus::Pending,
            phase: None,
            context: context.clone(),
            input_artifact: input_artifact.to_string(),
            output_artifact: None,
            progress: None,
            error: None,
            output: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn transition(&self, id: &TaskId, update: TaskUpdate) -> Result<Task> {
        self.check_writable()?;

        let mut task = self.read(id).await?;
        let next = update.status.unwrap_or(task.status);

        if task.status.is_terminal() {
            return Err(VariantFlowError::validation(format!(
                "task {id} is already {} and cannot change",
                task.status
            )));
        }
        if !task.status.can_transition_to(next) {
            return Err(VariantFlowError::validation(format!(
                "task {id}: illegal transition {} -> {next}",
                task.status
            )));
        }

        task.status = next;
        if let Some(phase) = update.phase {
            task.phase = Some(phase);
        }
        if let Some(artifact) = update.output_artifact {
            task.output_artifact = Some(artifact);
        }
        if let Some(progress) = update.progress {
            task.progress = Some(progress);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        if let Some(output) = update.output {
            task.output = Some(output);
        }

        if task.status == TaskStatus::Completed && task.output_artifact.is_none() {
            return Err(VariantFlowError::validation(format!(
                "task {id} cannot complete without an output artifact"
            )));
        }

        task.updated_at = Utc::now();
        self.write_task(&task).await?;

        tracing::debug!(
            task_id = %id,
            status = %task.status,
            phase = task.phase.as_deref().unwrap_or(""),
            "task updated"
        );
        Ok(task)
    }

    async fn read(&self, id: &TaskId) -> Result<Task> {
        self.get_task(id)
            .await?
            .ok_or_else(|| VariantFlowError::not_found(format!("task {id}")))
    }

    async fn record_session(
        &self,
        context: &TaskContext,
        update: SessionUpdate,
    ) -> Result<SessionMetadata> {
        self.check_writable()?;

        let mut meta = match self.read_session(&context.session_id).await? {
            Some(existing) => existing,
            None => SessionMetadata::new(context, update.session_status()),
        };
        meta.apply(context.scope, update);

        let metadata_json =
            serde_json::to_string(&meta).map_err(|e| VariantFlowError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO session_metadata (session_id, user_id, status, metadata_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(session_id) DO UPDATE SET
                   user_id = excluded.user_id,
                   status = excluded.status,
                   metadata_json = excluded.metadata_json,
                   updated_at = excluded.updated_at",
                params![
                    meta.session_id.as_str(),
                    meta.user_id.as_str(),
                    meta.status.as_str(),
                    metadata_json,
                    meta.created_at.to_rfc3339(),
                    meta.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        tracing::debug!(
            session_id = %meta.session_id,
            status = %meta.status,
            "session metadata updated"
        );
        Ok(meta)
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        let mut rows = self
            .conn
            .query(
                "SELECT metadata_json FROM session_metadata WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| VariantFlowError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json = row
                    .get::<String>(0)
                    .map_err(|e| VariantFlowError::Storage(e.to_string()))?;
                let meta = serde_json::from_str(&json).map_err(|e| {
                    VariantFlowError::Storage(format!("invalid session metadata: {e}"))
                })?;
                Ok(Some(meta))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(VariantFlowError::Storage(e.to_string())),
        }
    }
}

const TASK_COLUMNS: &str = "id, kind, status, phase, context_json, input_artifact, output_artifact, progress_json, error, output_json, created_at, updated_at";

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VariantFlowError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Task`].
fn row_to_task(row: &libsql::Row) -> Result<Task> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| VariantFlowError::Storage(e.to_string()))
    };

    let context: TaskContext = serde_json::from_str(&text(4)?)
        .map_err(|e| VariantFlowError::Storage(format!("invalid task context: {e}")))?;
    let progress: Option<TaskProgress> = match row.get::<String>(7).ok() {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| VariantFlowError::Storage(format!("invalid progress: {e}")))?,
        ),
        None => None,
    };
    let output = match row.get::<String>(9).ok() {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| VariantFlowError::Storage(format!("invalid output: {e}")))?,
        ),
        None => None,
    };

    Ok(Task {
        id: TaskId(text(0)?),
        kind: text(1)?.parse()?,
        status: text(2)?.parse()?,
        phase: row.get::<String>(3).ok(),
        context,
        input_artifact: text(5)?,
        output_artifact: row.get::<String>(6).ok(),
        progress,
        error: row.get::<String>(8).ok(),
        output,
        created_at: parse_timestamp(&text(10)?)?,
        updated_at: parse_timestamp(&text(11)?)?,
    })
}
