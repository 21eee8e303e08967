//! SQLite persistence for sessions.
//!
//! One row per session. History is a JSON array column and the environment is
//! three nullable columns, so every mutation rewrites a complete row inside a
//! single transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use omnirepl_types::{EnvironmentState, HistoryEntry, Language, Session};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use crate::error::{RegistryError, Result};

const SELECT_COLUMNS: &str = "SELECT id, name, language, created_at, last_accessed, execution_count, \
     history, environment_language, environment_data, environment_updated FROM sessions";

/// Fixed-width UTC timestamps so that text comparison in SQL orders correctly.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| RegistryError::internal(format!("Invalid {} '{}': {}", column, value, e)))
}

/// What happened to a session on an activity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Created,
    Recorded,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if needed) the database at `database_url`, e.g.
    /// `sqlite://./data/sessions.db`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RegistryError::internal(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// A private in-memory database; used by tests and throwaway registries.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                language TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                execution_count INTEGER NOT NULL DEFAULT 0,
                history TEXT NOT NULL DEFAULT '[]',
                environment_language TEXT NULL,
                environment_data TEXT NULL,
                environment_updated TEXT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_last_accessed
            ON sessions(last_accessed);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn insert(&self, session: &Session) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_row(&mut tx, session).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a session named by `name`, or `"Session {N+1}"` when `name` is
    /// `None`. The count and the insert are one statement.
    pub async fn create(&self, id: &str, name: Option<String>, language: Language) -> Result<Session> {
        let mut tx = self.pool.begin().await?;
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, language, created_at, last_accessed, execution_count, history)
            SELECT ?1, COALESCE(?2, 'Session ' || (COUNT(*) + 1)), ?3, ?4, ?4, 0, '[]'
            FROM sessions;
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(language.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let session = Self::fetch_in(&mut tx, id)
            .await?
            .ok_or_else(|| RegistryError::internal(format!("Session {} vanished after insert", id)))?;
        tx.commit().await?;
        Ok(session)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_session(&row)).transpose()
    }

    pub async fn fetch_all(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_session).collect()
    }

    /// Refresh `last_accessed` and return the updated session.
    pub async fn touch(&self, id: &str) -> Result<Option<Session>> {
        let mut tx = self.pool.begin().await?;
        if !Self::touch_in(&mut tx, id, Utc::now()).await? {
            return Ok(None);
        }
        let session = Self::fetch_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(session)
    }

    /// Returns `true` if a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the session only if it is still idle at `cutoff`; a session touched
    /// after it was selected for expiry survives.
    pub async fn delete_if_idle(&self, id: &str, cutoff: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1 AND last_accessed < ?2")
            .bind(id)
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sessions whose last access is older than `cutoff`.
    pub async fn select_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<(String, Language)>> {
        let rows = sqlx::query("SELECT id, language FROM sessions WHERE last_accessed < ?1")
            .bind(timestamp(cutoff))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let language: String = row.get("language");
                (id, Language::new(language))
            })
            .collect())
    }

    /// Read-modify-write of one session.
    ///
    /// `last_accessed` is refreshed before `mutate` sees the session and the
    /// whole row is written back on success. Returning `Err` from `mutate`
    /// rolls the transaction back, including the refresh.
    pub async fn update_with<T, F>(&self, id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock before the read.
        if !Self::touch_in(&mut tx, id, Utc::now()).await? {
            return Err(RegistryError::not_found(id));
        }
        let mut session = Self::fetch_in(&mut tx, id)
            .await?
            .ok_or_else(|| RegistryError::not_found(id))?;

        let value = mutate(&mut session)?;
        Self::write_row(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(value)
    }

    /// Count an execution against `id`, creating the session (count 0) if it
    /// does not exist.
    pub async fn record_activity(&self, id: &str, language: &Language) -> Result<ActivityOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        if !Self::touch_in(&mut tx, id, now).await? {
            let existing = Self::count_in(&mut tx).await?;
            let session = Session::new(id, Session::default_name(existing), language.clone());
            Self::insert_row(&mut tx, &session).await?;
            tx.commit().await?;
            return Ok(ActivityOutcome::Created);
        }

        let stored: String = sqlx::query_scalar("SELECT language FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = Language::new(stored);
        if &stored != language {
            return Err(RegistryError::LanguageConflict {
                session_id: id.to_string(),
                stored,
                requested: language.clone(),
            });
        }

        sqlx::query("UPDATE sessions SET execution_count = execution_count + 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ActivityOutcome::Recorded)
    }

    async fn touch_in(tx: &mut Transaction<'_, Sqlite>, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET last_accessed = ?1 WHERE id = ?2")
            .bind(timestamp(at))
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_in(tx: &mut Transaction<'_, Sqlite>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&mut **tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_in(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|row| row_to_session(&row)).transpose()
    }

    async fn insert_row(tx: &mut Transaction<'_, Sqlite>, session: &Session) -> Result<()> {
        let environment = session.environment.as_ref();
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id,
                name,
                language,
                created_at,
                last_accessed,
                execution_count,
                history,
                environment_language,
                environment_data,
                environment_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.language.as_str())
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.last_accessed))
        .bind(session.execution_count as i64)
        .bind(serde_json::to_string(&session.history)?)
        .bind(environment.map(|env| env.language.to_string()))
        .bind(environment.and_then(|env| env.serialized_data.clone()))
        .bind(environment.map(|env| timestamp(env.last_updated)))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_row(tx: &mut Transaction<'_, Sqlite>, session: &Session) -> Result<()> {
        let environment = session.environment.as_ref();
        sqlx::query(
            r#"
            UPDATE sessions SET
                name = ?2,
                last_accessed = ?3,
                execution_count = ?4,
                history = ?5,
                environment_language = ?6,
                environment_data = ?7,
                environment_updated = ?8
            WHERE id = ?1;
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(timestamp(session.last_accessed))
        .bind(session.execution_count as i64)
        .bind(serde_json::to_string(&session.history)?)
        .bind(environment.map(|env| env.language.to_string()))
        .bind(environment.and_then(|env| env.serialized_data.clone()))
        .bind(environment.map(|env| timestamp(env.last_updated)))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let created_at: String = row.get("created_at");
    let last_accessed: String = row.get("last_accessed");
    let execution_count: i64 = row.get("execution_count");
    let history: String = row.get("history");
    let environment_language: Option<String> = row.get("environment_language");
    let environment_data: Option<String> = row.get("environment_data");
    let environment_updated: Option<String> = row.get("environment_updated");

    let language = Language::new(row.get::<String, _>("language"));
    let last_accessed = parse_timestamp("last_accessed", &last_accessed)?;
    let history: Vec<HistoryEntry> = serde_json::from_str(&history)?;

    // A stored language without data is reported as no environment.
    let environment = match environment_data {
        Some(data) => Some(EnvironmentState {
            language: environment_language
                .map(Language::new)
                .unwrap_or_else(|| language.clone()),
            serialized_data: Some(data),
            last_updated: match environment_updated {
                Some(updated) => parse_timestamp("environment_updated", &updated)?,
                None => last_accessed,
            },
        }),
        None => None,
    };

    Ok(Session {
        id: row.get("id"),
        name: row.get("name"),
        language,
        created_at: parse_timestamp("created_at", &created_at)?,
        last_accessed,
        execution_count: execution_count.max(0) as u64,
        history,
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use omnirepl_types::HistoryKind;

    #[tokio::test]
    async fn test_insert_and_fetch_round_trip() {
        let store = SessionStore::in_memory().await.unwrap();
        let mut session = Session::new("s1", "First", Language::new("kite"));
        session.history.push(HistoryEntry::new("e1", HistoryKind::Input, "print 1"));
        store.insert(&session).await.unwrap();

        let fetched = store.fetch("s1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "First");
        assert_eq!(fetched.language, "kite");
        assert_eq!(fetched.history, session.history);
        assert!(fetched.environment.is_none());
        assert!(store.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_uses_default_name() {
        let store = SessionStore::in_memory().await.unwrap();
        let first = store.create("a", None, Language::new("kite")).await.unwrap();
        let second = store.create("b", None, Language::new("kite")).await.unwrap();
        let named = store.create("c", Some("Mine".into()), Language::new("bash")).await.unwrap();

        assert_eq!(first.name, "Session 1");
        assert_eq!(second.name, "Session 2");
        assert_eq!(named.name, "Mine");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_with_rolls_back_on_error() {
        let store = SessionStore::in_memory().await.unwrap();
        store.create("s1", None, Language::new("kite")).await.unwrap();

        let result: Result<()> = store
            .update_with("s1", |session| {
                session.name = "changed".to_string();
                Err(RegistryError::invalid_request("nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.fetch("s1").await.unwrap().unwrap().name, "Session 1");

        let missing: Result<()> = store.update_with("missing", |_| Ok(())).await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_record_activity_creates_then_counts() {
        let store = SessionStore::in_memory().await.unwrap();
        let kite = Language::new("kite");

        assert_eq!(store.record_activity("s1", &kite).await.unwrap(), ActivityOutcome::Created);
        assert_eq!(store.fetch("s1").await.unwrap().unwrap().execution_count, 0);

        assert_eq!(store.record_activity("s1", &kite).await.unwrap(), ActivityOutcome::Recorded);
        assert_eq!(store.fetch("s1").await.unwrap().unwrap().execution_count, 1);

        let conflict = store.record_activity("s1", &Language::new("bash")).await;
        assert!(matches!(conflict, Err(RegistryError::LanguageConflict { .. })));
        assert_eq!(store.fetch("s1").await.unwrap().unwrap().execution_count, 1);
    }

    #[tokio::test]
    async fn test_delete_if_idle_spares_touched_sessions() {
        let store = SessionStore::in_memory().await.unwrap();
        store.create("old", None, Language::new("kite")).await.unwrap();

        let cutoff = Utc::now() + Duration::seconds(1);
        let idle = store.select_idle(cutoff).await.unwrap();
        assert_eq!(idle, vec![("old".to_string(), Language::new("kite"))]);

        // Touched after selection: no longer older than an earlier cutoff.
        store.touch("old").await.unwrap();
        let earlier = Utc::now() - Duration::seconds(60);
        assert!(!store.delete_if_idle("old", earlier).await.unwrap());
        assert!(store.delete_if_idle("old", cutoff).await.unwrap());
        assert!(store.fetch("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        let url = format!("sqlite://{}", path.display());

        let store = SessionStore::connect(&url).await.unwrap();
        store.create("s1", None, Language::new("kite")).await.unwrap();
        store.ping().await.unwrap();
        assert!(path.exists());

        drop(store);
        let reopened = SessionStore::connect(&url).await.unwrap();
        assert!(reopened.fetch("s1").await.unwrap().is_some());
    }
}
