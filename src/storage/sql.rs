// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for the durable tier.
//!
//! One row per record type, keyed by a unique numeric identity column:
//! ```sql
//! CREATE TABLE users (
//!   id BIGINT PRIMARY KEY,       -- platform user id
//!   first_name, username, admin_title VARCHAR,
//!   is_admin, is_winner BIGINT,  -- 0/1
//!   warns, message_count BIGINT,
//!   status VARCHAR(16),          -- active | muted | restricted | banned
//!   mute_until VARCHAR(40) NULL, -- RFC 3339, nanosecond precision
//!   birthday VARCHAR(10) NULL,   -- YYYY-MM-DD
//!   updated_at BIGINT,
//!   deleted_at BIGINT NULL       -- soft-delete marker
//! )
//! CREATE TABLE quizzes (
//!   id BIGINT AUTO_INCREMENT PRIMARY KEY,
//!   quiz_date VARCHAR(10) UNIQUE, -- one quiz per civil day
//!   quote, answer TEXT, scheduled_at VARCHAR(32), -- HH:MM:SS[.fffffffff]
//!   is_active BIGINT, winner_id BIGINT NULL, deleted_at BIGINT NULL
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! Flags are stored as BIGINT 0/1 and dates and instants as ISO-8601 text
//! because the `Any` driver has no portable boolean/date mapping. Instants
//! and times keep their full sub-second precision so a record reads back
//! exactly as it was written. MySQL hands TEXT back
//! as bytes, so text columns are read as `String` first, then as `Vec<u8>`.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};

use super::traits::{DurableStore, StorageError};
use crate::record::{QuizRecord, UserField, UserFlag, UserRecord, UserStatus};
use crate::resilience::retry::{retry, retry_when, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const USER_COLUMNS: &str = "id, first_name, username, is_admin, warns, status, is_winner, \
     admin_title, mute_until, birthday, message_count";

const QUIZ_COLUMNS: &str = "quiz_date, quote, answer, scheduled_at, is_active, winner_id";

fn map_sql_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StorageError::Constraint(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StorageError::Decode(e.to_string())
        }
        other => StorageError::Unavailable(other.to_string()),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Read a text column, tolerating MySQL's bytes-for-TEXT behaviour.
fn text_column(row: &AnyRow, name: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(name)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(name)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn instant_to_text(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn time_to_text(time: &NaiveTime) -> String {
    time.format("%H:%M:%S%.f").to_string()
}

fn int_column(row: &AnyRow, name: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(name).map_err(map_sql_err)
}

fn user_from_row(row: &AnyRow) -> Result<UserRecord, StorageError> {
    let status = text_column(row, "status")
        .unwrap_or_else(|| "active".to_string())
        .parse::<UserStatus>()?;

    let mute_until = match text_column(row, "mute_until") {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| StorageError::Decode(format!("mute_until '{}': {}", s, e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let birthday = match text_column(row, "birthday") {
        Some(s) => Some(
            s.parse::<NaiveDate>()
                .map_err(|e| StorageError::Decode(format!("birthday '{}': {}", s, e)))?,
        ),
        None => None,
    };

    Ok(UserRecord {
        id: int_column(row, "id")?,
        first_name: text_column(row, "first_name").unwrap_or_default(),
        username: text_column(row, "username").unwrap_or_default(),
        is_admin: int_column(row, "is_admin")? != 0,
        warns: int_column(row, "warns")?.clamp(0, i64::from(u32::MAX)) as u32,
        status,
        is_winner: int_column(row, "is_winner")? != 0,
        admin_title: text_column(row, "admin_title").unwrap_or_default(),
        mute_until,
        birthday,
        message_count: int_column(row, "message_count")?.max(0) as u64,
    })
}

fn quiz_from_row(row: &AnyRow) -> Result<QuizRecord, StorageError> {
    let date_str = text_column(row, "quiz_date")
        .ok_or_else(|| StorageError::Decode("quiz row without date".into()))?;
    let date = date_str
        .parse::<NaiveDate>()
        .map_err(|e| StorageError::Decode(format!("quiz_date '{}': {}", date_str, e)))?;

    let time_str = text_column(row, "scheduled_at").unwrap_or_default();
    let scheduled_at = time_str
        .parse::<NaiveTime>()
        .map_err(|e| StorageError::Decode(format!("scheduled_at '{}': {}", time_str, e)))?;

    Ok(QuizRecord {
        date,
        quote: text_column(row, "quote").unwrap_or_default(),
        answer: text_column(row, "answer").unwrap_or_default(),
        scheduled_at,
        active: int_column(row, "is_active")? != 0,
        winner_id: row.try_get::<Option<i64>, _>("winner_id").map_err(map_sql_err)?,
    })
}

fn bind_user<'q>(query: Query<'q, Any, AnyArguments<'q>>, user: &UserRecord) -> Query<'q, Any, AnyArguments<'q>> {
    query
        .bind(user.id)
        .bind(user.first_name.clone())
        .bind(user.username.clone())
        .bind(i64::from(user.is_admin))
        .bind(i64::from(user.warns))
        .bind(user.status.as_str())
        .bind(i64::from(user.is_winner))
        .bind(user.admin_title.clone())
        .bind(user.mute_until.as_ref().map(instant_to_text))
        .bind(user.birthday.map(|d| d.to_string()))
        .bind(user.message_count.min(i64::MAX as u64) as i64)
        .bind(now_millis())
}

fn bind_field<'q>(query: Query<'q, Any, AnyArguments<'q>>, field: &UserField) -> Query<'q, Any, AnyArguments<'q>> {
    match field {
        UserField::Warns(warns) => query.bind(i64::from(*warns)),
        UserField::Status(status) => query.bind(status.as_str()),
        UserField::IsWinner(flag) | UserField::IsAdmin(flag) => query.bind(i64::from(*flag)),
        UserField::AdminTitle(title) => query.bind(title.clone()),
        UserField::MuteUntil(until) => query.bind(until.as_ref().map(instant_to_text)),
        UserField::Birthday(date) => query.bind(date.map(|d| d.to_string())),
    }
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Create a new SQL store with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 5 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(map_sql_err)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// `SELECT 1` round trip, run by `connect` before serving.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sql_err)?;
        Ok(())
    }

    /// Enable WAL (Write-Ahead Logging) mode for SQLite so readers don't
    /// block the propagation writers.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: [&str; 2] = if self.is_sqlite {
            [
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    first_name TEXT NOT NULL DEFAULT '',
                    username TEXT NOT NULL DEFAULT '',
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    warns INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'active',
                    is_winner INTEGER NOT NULL DEFAULT 0,
                    admin_title TEXT NOT NULL DEFAULT '',
                    mute_until TEXT,
                    birthday TEXT,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    updated_at INTEGER NOT NULL DEFAULT 0,
                    deleted_at INTEGER
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS quizzes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    quiz_date TEXT NOT NULL UNIQUE,
                    quote TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    scheduled_at TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    winner_id INTEGER,
                    deleted_at INTEGER
                )
                "#,
            ]
        } else {
            [
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id BIGINT PRIMARY KEY,
                    first_name VARCHAR(255) NOT NULL DEFAULT '',
                    username VARCHAR(255) NOT NULL DEFAULT '',
                    is_admin BIGINT NOT NULL DEFAULT 0,
                    warns BIGINT NOT NULL DEFAULT 0,
                    status VARCHAR(16) NOT NULL DEFAULT 'active',
                    is_winner BIGINT NOT NULL DEFAULT 0,
                    admin_title VARCHAR(255) NOT NULL DEFAULT '',
                    mute_until VARCHAR(40) NULL,
                    birthday VARCHAR(10) NULL,
                    message_count BIGINT NOT NULL DEFAULT 0,
                    updated_at BIGINT NOT NULL DEFAULT 0,
                    deleted_at BIGINT NULL,
                    INDEX idx_status (status),
                    INDEX idx_deleted (deleted_at)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS quizzes (
                    id BIGINT AUTO_INCREMENT PRIMARY KEY,
                    quiz_date VARCHAR(10) NOT NULL UNIQUE,
                    quote TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    scheduled_at VARCHAR(32) NOT NULL,
                    is_active BIGINT NOT NULL DEFAULT 1,
                    winner_id BIGINT NULL,
                    deleted_at BIGINT NULL
                )
                "#,
            ]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sql_err)
            })
            .await?;
        }

        Ok(())
    }

    fn upsert_user_sql(&self) -> String {
        let base = format!(
            "INSERT INTO users ({}, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            USER_COLUMNS
        );
        let columns = [
            "first_name", "username", "is_admin", "warns", "status", "is_winner",
            "admin_title", "mute_until", "birthday", "message_count", "updated_at",
        ];
        if self.is_sqlite {
            let sets: Vec<String> = columns.iter().map(|c| format!("{c} = excluded.{c}")).collect();
            format!("{} ON CONFLICT(id) DO UPDATE SET {}, deleted_at = NULL", base, sets.join(", "))
        } else {
            let sets: Vec<String> = columns.iter().map(|c| format!("{c} = VALUES({c})")).collect();
            format!("{} ON DUPLICATE KEY UPDATE {}, deleted_at = NULL", base, sets.join(", "))
        }
    }

    fn upsert_quiz_sql(&self) -> String {
        let base = format!("INSERT INTO quizzes ({}) VALUES (?, ?, ?, ?, ?, ?)", QUIZ_COLUMNS);
        let columns = ["quote", "answer", "scheduled_at", "is_active", "winner_id"];
        if self.is_sqlite {
            let sets: Vec<String> = columns.iter().map(|c| format!("{c} = excluded.{c}")).collect();
            format!("{} ON CONFLICT(quiz_date) DO UPDATE SET {}, deleted_at = NULL", base, sets.join(", "))
        } else {
            let sets: Vec<String> = columns.iter().map(|c| format!("{c} = VALUES({c})")).collect();
            format!("{} ON DUPLICATE KEY UPDATE {}, deleted_at = NULL", base, sets.join(", "))
        }
    }

    async fn count_where(&self, clause: &str, bind: Option<&str>) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM users WHERE deleted_at IS NULL{}", clause);
        retry_when("sql_count", &RetryConfig::query(), StorageError::is_retryable, || async {
            let mut query = sqlx::query(&sql);
            if let Some(value) = bind {
                query = query.bind(value);
            }
            let row = query.fetch_one(&self.pool).await.map_err(map_sql_err)?;
            Ok(int_column(&row, "cnt")?.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl DurableStore for SqlStore {
    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        let sql = format!("SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL", USER_COLUMNS);
        retry_when("sql_get_user", &RetryConfig::query(), StorageError::is_retryable, || async {
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sql_err)?;
            row.as_ref().map(user_from_row).transpose()
        })
        .await
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO users ({}, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            USER_COLUMNS
        );
        // A constraint violation is an answer, not a transient failure
        retry_when("sql_insert_user", &RetryConfig::query(), StorageError::is_retryable, || async {
            bind_user(sqlx::query(&sql), user)
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(())
        })
        .await
    }

    async fn save_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let sql = self.upsert_user_sql();
        retry_when("sql_save_user", &RetryConfig::query(), StorageError::is_retryable, || async {
            bind_user(sqlx::query(&sql), user)
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(())
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let sql = format!("SELECT {} FROM users WHERE deleted_at IS NULL ORDER BY id", USER_COLUMNS);
        let rows = retry_when("sql_list_users", &RetryConfig::query(), StorageError::is_retryable, || async {
            sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sql_err)
        })
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn update_user_field(&self, id: i64, field: &UserField) -> Result<u64, StorageError> {
        // Column names come from a closed enum, never from input
        let sql = format!(
            "UPDATE users SET {} = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
            field.column()
        );
        retry_when("sql_update_field", &RetryConfig::query(), StorageError::is_retryable, || async {
            let result = bind_field(sqlx::query(&sql), field)
                .bind(now_millis())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn clear_winner_flags(&self) -> Result<u64, StorageError> {
        retry_when("sql_clear_winners", &RetryConfig::query(), StorageError::is_retryable, || async {
            let result = sqlx::query(
                "UPDATE users SET is_winner = 0, updated_at = ? WHERE is_winner <> 0 AND deleted_at IS NULL",
            )
                .bind(now_millis())
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn soft_delete_user(&self, id: i64) -> Result<u64, StorageError> {
        retry_when("sql_soft_delete", &RetryConfig::query(), StorageError::is_retryable, || async {
            let result = sqlx::query("UPDATE users SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now_millis())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn count_users(&self) -> Result<u64, StorageError> {
        self.count_where("", None).await
    }

    async fn count_users_by_status(&self, status: UserStatus) -> Result<u64, StorageError> {
        self.count_where(" AND status = ?", Some(status.as_str())).await
    }

    async fn count_users_by_flag(&self, flag: UserFlag) -> Result<u64, StorageError> {
        let clause = format!(" AND {} <> 0", flag.column());
        self.count_where(&clause, None).await
    }

    async fn get_quiz(&self, date: NaiveDate) -> Result<Option<QuizRecord>, StorageError> {
        let sql = format!("SELECT {} FROM quizzes WHERE quiz_date = ? AND deleted_at IS NULL", QUIZ_COLUMNS);
        let date = date.to_string();
        retry_when("sql_get_quiz", &RetryConfig::query(), StorageError::is_retryable, || async {
            let row = sqlx::query(&sql)
                .bind(date.clone())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sql_err)?;
            row.as_ref().map(quiz_from_row).transpose()
        })
        .await
    }

    async fn save_quiz(&self, quiz: &QuizRecord) -> Result<(), StorageError> {
        let sql = self.upsert_quiz_sql();
        retry_when("sql_save_quiz", &RetryConfig::query(), StorageError::is_retryable, || async {
            sqlx::query(&sql)
                .bind(quiz.date.to_string())
                .bind(quiz.quote.clone())
                .bind(quiz.answer.clone())
                .bind(time_to_text(&quiz.scheduled_at))
                .bind(i64::from(quiz.active))
                .bind(quiz.winner_id)
                .execute(&self.pool)
                .await
                .map_err(map_sql_err)?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        // Use local temp/ folder (gitignored) instead of system temp
        let _ = std::fs::create_dir_all("temp");
        PathBuf::from("temp").join(format!("sql_test_{}.db", name))
    }

    /// Clean up SQLite database and its WAL files
    fn cleanup_db(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(format!("{}-wal", path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", path.display()));
    }

    async fn open(name: &str) -> (SqlStore, PathBuf) {
        let db_path = temp_db_path(name);
        cleanup_db(&db_path);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        (SqlStore::new(&url).await.unwrap(), db_path)
    }

    fn full_user(id: i64) -> UserRecord {
        UserRecord {
            id,
            first_name: "Ada".into(),
            username: "ada".into(),
            is_admin: true,
            warns: 2,
            status: UserStatus::Muted,
            is_winner: true,
            admin_title: "owner".into(),
            mute_until: Some(Utc.with_ymd_and_hms(2026, 11, 1, 12, 30, 0).unwrap()),
            birthday: NaiveDate::from_ymd_opt(1990, 12, 10),
            message_count: 1234,
        }
    }

    #[tokio::test]
    async fn test_user_roundtrip_all_columns() {
        let (store, path) = open("user_roundtrip").await;

        let user = full_user(100);
        store.save_user(&user).await.unwrap();
        assert_eq!(store.get_user(100).await.unwrap(), Some(user));
        assert_eq!(store.get_user(101).await.unwrap(), None);

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_ping() {
        let (store, path) = open("ping").await;
        store.ping().await.unwrap();
        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_instants_keep_full_precision() {
        let (store, path) = open("precision").await;

        let mut user = full_user(7);
        user.mute_until = Some(Utc::now() + chrono::Duration::minutes(10));
        store.save_user(&user).await.unwrap();
        assert_eq!(store.get_user(7).await.unwrap(), Some(user.clone()));

        let later = Utc.timestamp_opt(1_900_000_000, 123_456_789).unwrap();
        store.update_user_field(7, &UserField::MuteUntil(Some(later))).await.unwrap();
        assert_eq!(store.get_user(7).await.unwrap().unwrap().mute_until, Some(later));

        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let time = NaiveTime::from_hms_nano_opt(12, 0, 0, 500_000_000).unwrap();
        let quiz = QuizRecord::new(date, "q", "a", time);
        store.save_quiz(&quiz).await.unwrap();
        assert_eq!(store.get_quiz(date).await.unwrap(), Some(quiz));

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_constraint() {
        let (store, path) = open("insert_dup").await;

        let user = UserRecord::new(5, false);
        store.insert_user(&user).await.unwrap();
        let err = store.insert_user(&user).await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)), "got {:?}", err);

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_save_user_upserts() {
        let (store, path) = open("upsert").await;

        let mut user = UserRecord::new(9, false);
        store.save_user(&user).await.unwrap();
        user.warns = 3;
        user.status = UserStatus::Restricted;
        store.save_user(&user).await.unwrap();

        assert_eq!(store.count_users().await.unwrap(), 1);
        assert_eq!(store.get_user(9).await.unwrap().unwrap().warns, 3);

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_update_field_affected_rows() {
        let (store, path) = open("update_field").await;

        store.save_user(&UserRecord::new(1, false)).await.unwrap();
        assert_eq!(store.update_user_field(1, &UserField::Status(UserStatus::Banned)).await.unwrap(), 1);
        assert_eq!(store.update_user_field(1, &UserField::MuteUntil(None)).await.unwrap(), 1);
        assert_eq!(store.update_user_field(2, &UserField::Warns(1)).await.unwrap(), 0);
        assert_eq!(store.get_user(1).await.unwrap().unwrap().status, UserStatus::Banned);

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_counters_winners_and_soft_delete() {
        let (store, path) = open("counters").await;

        store.save_user(&full_user(1)).await.unwrap();
        store.save_user(&full_user(2)).await.unwrap();
        store.save_user(&UserRecord::new(3, false)).await.unwrap();

        assert_eq!(store.count_users().await.unwrap(), 3);
        assert_eq!(store.count_users_by_status(UserStatus::Muted).await.unwrap(), 2);
        assert_eq!(store.count_users_by_status(UserStatus::Active).await.unwrap(), 1);
        assert_eq!(store.count_users_by_flag(UserFlag::Admin).await.unwrap(), 2);

        assert_eq!(store.clear_winner_flags().await.unwrap(), 2);
        assert_eq!(store.count_users_by_flag(UserFlag::Winner).await.unwrap(), 0);

        assert_eq!(store.soft_delete_user(2).await.unwrap(), 1);
        assert_eq!(store.soft_delete_user(2).await.unwrap(), 0);
        assert_eq!(store.count_users().await.unwrap(), 2);
        assert!(store.get_user(2).await.unwrap().is_none());
        assert_eq!(store.list_users().await.unwrap().len(), 2);

        // Saving again revives the row
        store.save_user(&full_user(2)).await.unwrap();
        assert!(store.get_user(2).await.unwrap().is_some());

        store.close().await;
        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_quiz_upsert_one_row_per_day() {
        let (store, path) = open("quiz").await;

        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let time = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        let mut quiz = QuizRecord::new(date, "To be or not to be", "Hamlet", time);
        store.save_quiz(&quiz).await.unwrap();
        quiz.record_winner(77);
        store.save_quiz(&quiz).await.unwrap();

        let stored = store.get_quiz(date).await.unwrap().unwrap();
        assert_eq!(stored, quiz);
        assert!(!stored.active);

        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM quizzes")
            .fetch_one(&store.pool())
            .await
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("cnt").unwrap(), 1);

        assert!(store.get_quiz(date.succ_opt().unwrap()).await.unwrap().is_none());

        store.close().await;
        cleanup_db(&path);
    }
}
