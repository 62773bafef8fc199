//! Durable run history in SQLite.
//!
//! Three tables: `runs`, `tasks` (keyed by run and task id) and `events`
//! (autoincrement id, full envelope stored as JSON). Everything survives a
//! restart and is queryable by run id, independent of in-memory state.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use agentrun_core::{CoreError, Event, Run, RunId, RunMode, RunStatus, Task, TaskId, TaskStatus};

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("event payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored column holds a value this version cannot interpret.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        id           TEXT PRIMARY KEY,
        goal         TEXT NOT NULL,
        model        TEXT,
        mode         TEXT NOT NULL,
        status       TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        completed_at TEXT,
        error        TEXT
    );
    CREATE TABLE IF NOT EXISTS tasks (
        id           INTEGER NOT NULL,
        run_id       TEXT NOT NULL REFERENCES runs(id),
        title        TEXT NOT NULL,
        description  TEXT NOT NULL,
        status       TEXT NOT NULL,
        result       TEXT,
        reflection   TEXT,
        created_at   TEXT NOT NULL,
        completed_at TEXT,
        PRIMARY KEY (run_id, id)
    );
    CREATE TABLE IF NOT EXISTS events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id       TEXT NOT NULL REFERENCES runs(id),
        event_type   TEXT NOT NULL,
        event_data   TEXT NOT NULL,
        created_at   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id);
    CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);";

/// SQLite-backed run store. Cheap to clone.
#[derive(Clone)]
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        info!(path = %path.display(), "Run store opened");
        Self::with_connection(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        self.conn.lock().await.execute_batch(sql)?;
        Ok(())
    }

    pub async fn create_run(&self, run: &Run) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO runs (id, goal, model, mode, status, created_at, completed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id.as_str(),
                run.goal,
                run.model,
                run.mode.as_str(),
                run.status.as_str(),
                timestamp(&run.created_at),
                run.completed_at.as_ref().map(timestamp),
                run.error,
            ],
        )?;
        Ok(())
    }

    /// Persist a run's status, completion time and error.
    pub async fn update_run(&self, run: &Run) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2, error = ?3 WHERE id = ?4",
            params![
                run.status.as_str(),
                run.completed_at.as_ref().map(timestamp),
                run.error,
                run.id.as_str(),
            ],
        )?;
        Ok(())
    }

    pub async fn add_task(&self, task: &Task) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks
             (id, run_id, title, description, status, result, reflection, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id.get(),
                task.run_id.as_str(),
                task.title,
                task.description,
                task.status.as_str(),
                task.result,
                task.reflection,
                timestamp(&task.created_at),
                task.completed_at.as_ref().map(timestamp),
            ],
        )?;
        Ok(())
    }

    pub async fn update_task(&self, task: &Task) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = ?1, result = ?2, reflection = ?3, completed_at = ?4
             WHERE run_id = ?5 AND id = ?6",
            params![
                task.status.as_str(),
                task.result,
                task.reflection,
                task.completed_at.as_ref().map(timestamp),
                task.run_id.as_str(),
                task.id.get(),
            ],
        )?;
        Ok(())
    }

    pub async fn add_event(&self, event: &Event) -> StoreResult<()> {
        let data = serde_json::to_string(event)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (run_id, event_type, event_data, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.run_id.as_str(),
                event.event_type(),
                data,
                timestamp(&event.created_at),
            ],
        )?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<Run>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                "SELECT id, goal, model, mode, status, created_at, completed_at, error
                 FROM runs WHERE id = ?1",
                params![run_id.as_str()],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::into_run).transpose()
    }

    /// Tasks of a run, ordered by task id.
    pub async fn get_run_tasks(&self, run_id: &RunId) -> StoreResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, title, description, status, result, reflection, created_at, completed_at
             FROM tasks WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id.as_str()], RawTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTask::into_task).collect()
    }

    /// Events of a run, in append order.
    pub async fn get_run_events(&self, run_id: &RunId) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT event_data FROM events WHERE run_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(StoreError::from))
            .collect()
    }

    /// All runs, most recent first.
    pub async fn list_runs(&self) -> StoreResult<Vec<Run>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, goal, model, mode, status, created_at, completed_at, error
             FROM runs ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], RawRun::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRun::into_run).collect()
    }

    /// Remove a run with its tasks and events. Returns whether the run existed.
    pub async fn delete_run(&self, run_id: &RunId) -> StoreResult<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE run_id = ?1", params![run_id.as_str()])?;
        tx.execute("DELETE FROM tasks WHERE run_id = ?1", params![run_id.as_str()])?;
        let removed = tx.execute("DELETE FROM runs WHERE id = ?1", params![run_id.as_str()])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{value}': {e}")))
}

fn parse_optional_timestamp(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

struct RawRun {
    id: String,
    goal: String,
    model: Option<String>,
    mode: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    error: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            goal: row.get(1)?,
            model: row.get(2)?,
            mode: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            completed_at: row.get(6)?,
            error: row.get(7)?,
        })
    }

    fn into_run(self) -> StoreResult<Run> {
        Ok(Run {
            id: RunId::new(self.id),
            goal: self.goal,
            model: self.model,
            mode: RunMode::from_str(&self.mode)?,
            status: RunStatus::from_str(&self.status)?,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            error: self.error,
        })
    }
}

struct RawTask {
    id: u32,
    run_id: String,
    title: String,
    description: String,
    status: String,
    result: Option<String>,
    reflection: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            result: row.get(5)?,
            reflection: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn into_task(self) -> StoreResult<Task> {
        Ok(Task {
            run_id: RunId::new(self.run_id),
            id: TaskId::new(self.id),
            title: self.title,
            description: self.description,
            status: TaskStatus::from_str(&self.status)?,
            result: self.result,
            reflection: self.reflection,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::{EventKind, PlanItem, TaskOutcome};
    use tempfile::TempDir;

    fn run(goal: &str) -> Run {
        Run::new(goal, Some("gpt-4o".into()), RunMode::Confirm)
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let store = RunStore::open_in_memory().unwrap();
        let mut r = run("Build a blog");
        store.create_run(&r).await.unwrap();

        r.finish(RunStatus::Failed, Some("planner down".into()));
        store.update_run(&r).await.unwrap();

        let loaded = store.get_run(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.mode, RunMode::Confirm);
        assert_eq!(loaded.error.as_deref(), Some("planner down"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run_is_none() {
        let store = RunStore::open_in_memory().unwrap();
        assert!(store.get_run(&RunId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tasks_are_ordered_and_updated() {
        let store = RunStore::open_in_memory().unwrap();
        let r = run("goal");
        store.create_run(&r).await.unwrap();

        let mut second = Task::scheduled(r.id.clone(), &PlanItem::new(2, "Two", "b"));
        let first = Task::scheduled(r.id.clone(), &PlanItem::new(1, "One", "a"));
        store.add_task(&second).await.unwrap();
        store.add_task(&first).await.unwrap();

        second.start().unwrap();
        second
            .finish(&TaskOutcome::completed(second.id, "done", "fine"))
            .unwrap();
        store.update_task(&second).await.unwrap();

        let tasks = store.get_run_tasks(&r.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, TaskId::new(1));
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[1].status, TaskStatus::Completed);
        assert_eq!(tasks[1].result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_events_round_trip() {
        let store = RunStore::open_in_memory().unwrap();
        let r = run("goal");
        store.create_run(&r).await.unwrap();

        let a = Event::new(1, r.id.clone(), EventKind::PlanApproved);
        let b = Event::new(
            2,
            r.id.clone(),
            EventKind::RunComplete {
                status: RunStatus::Completed,
            },
        );
        store.add_event(&a).await.unwrap();
        store.add_event(&b).await.unwrap();

        let events = store.get_run_events(&r.id).await.unwrap();
        assert_eq!(events, vec![a, b]);
    }

    #[tokio::test]
    async fn test_list_runs_most_recent_first() {
        let store = RunStore::open_in_memory().unwrap();
        let older = run("older");
        let mut newer = run("newer");
        newer.created_at = older.created_at + chrono::Duration::seconds(5);

        store.create_run(&older).await.unwrap();
        store.create_run(&newer).await.unwrap();

        let goals: Vec<String> = store
            .list_runs()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.goal)
            .collect();
        assert_eq!(goals, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn test_delete_run_removes_everything() {
        let store = RunStore::open_in_memory().unwrap();
        let r = run("goal");
        store.create_run(&r).await.unwrap();
        store
            .add_task(&Task::scheduled(r.id.clone(), &PlanItem::new(1, "A", "")))
            .await
            .unwrap();
        store
            .add_event(&Event::new(1, r.id.clone(), EventKind::PlanEdit))
            .await
            .unwrap();

        assert!(store.delete_run(&r.id).await.unwrap());
        assert!(store.get_run(&r.id).await.unwrap().is_none());
        assert!(store.get_run_tasks(&r.id).await.unwrap().is_empty());
        assert!(store.get_run_events(&r.id).await.unwrap().is_empty());
        assert!(!store.delete_run(&r.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs.db");
        let r = run("durable");

        {
            let store = RunStore::open(&path).unwrap();
            store.create_run(&r).await.unwrap();
            store
                .add_event(&Event::new(1, r.id.clone(), EventKind::PlanApproved))
                .await
                .unwrap();
        }

        let reopened = RunStore::open(&path).unwrap();
        let loaded = reopened.get_run(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.goal, "durable");
        assert_eq!(reopened.get_run_events(&r.id).await.unwrap().len(), 1);
    }
}
