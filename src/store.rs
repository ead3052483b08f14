use crate::non_zero_duration::NonZeroDuration;
use crate::record::LocationRecord;

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DATABASE_URL_ENV: &str = "GEOCHECKIN_DATABASE_URL";

/// SQLite extended result codes for rejected credentials or permissions
const SQLITE_PERM: &str = "3";
const SQLITE_AUTH: &str = "23";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database rejected credentials: {0}")]
    Auth(String),
    #[error("database is unreachable: {0}")]
    Connection(String),
    #[error("write rejected: {0}")]
    Write(String),
    #[error(r#"collection name "{0}" must be an identifier"#)]
    InvalidCollection(String),
    #[error("database URL is not configured, set database.url or {DATABASE_URL_ENV}")]
    NoUrl,
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn from_sqlx(error: sqlx::Error, on_database_error: fn(String) -> Self) -> Self {
        match &error {
            sqlx::Error::Database(db_error)
                if matches!(db_error.code().as_deref(), Some(SQLITE_PERM | SQLITE_AUTH)) =>
            {
                Self::Auth(error.to_string())
            }
            sqlx::Error::Database(_) => on_database_error(error.to_string()),
            _ => Self::Connection(error.to_string()),
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "DatabaseConfig::default_collection")]
    pub collection: String,
    #[serde(default = "DatabaseConfig::default_connect_timeout")]
    pub connect_timeout: NonZeroDuration,
}

impl DatabaseConfig {
    fn default_collection() -> String {
        "locations".into()
    }

    fn default_connect_timeout() -> NonZeroDuration {
        NonZeroDuration::from_secs(30).unwrap()
    }

    /// Connection URL, the environment wins over the file so secrets can stay out of it
    pub fn resolved_url(&self) -> Option<String> {
        std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|url| !url.is_empty())
            .or_else(|| self.url.clone())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: Self::default_collection(),
            connect_timeout: Self::default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Append-only collection of location documents, one JSON document per row
pub struct LocationStore {
    pool: SqlitePool,
    collection: String,
    insert_sql: String,
}

impl LocationStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config.resolved_url().ok_or(StoreError::NoUrl)?;
        Self::connect_url(&url, config).await
    }

    async fn connect_url(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        if !is_identifier(&config.collection) {
            return Err(StoreError::InvalidCollection(config.collection.clone()));
        }
        let timeout: Duration = config.connect_timeout.into();
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::from_sqlx(e, StoreError::Connection))?;

        let store = Self {
            pool,
            collection: config.collection.clone(),
            insert_sql: format!(
                "INSERT INTO {} (document, inserted_at) VALUES (?, ?)",
                config.collection
            ),
        };
        store.ping().await?;
        store.ensure_collection().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, StoreError::Connection))?;
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                document TEXT NOT NULL,
                inserted_at INTEGER NOT NULL
            )",
            self.collection
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, StoreError::Connection))?;
        Ok(())
    }

    pub async fn try_insert(&self, record: &LocationRecord) -> Result<RecordId, StoreError> {
        let document = serde_json::to_string(record)?;
        let result = sqlx::query(&self.insert_sql)
            .bind(document)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, StoreError::Write))?;
        Ok(RecordId(result.last_insert_rowid()))
    }

    /// Appends `record`; failures are logged and dropped, nothing is retried
    pub async fn insert(&self, record: &LocationRecord) -> Option<RecordId> {
        match self.try_insert(record).await {
            Ok(id) => {
                log::debug!("stored {:?} location {id} in {}", record.method(), self.collection);
                Some(id)
            }
            Err(err) => {
                log::error!("cannot store {:?} location: {err}", record.method());
                None
            }
        }
    }

    #[cfg(test)]
    pub async fn documents(&self) -> Vec<LocationRecord> {
        use sqlx::Row;

        let sql = format!("SELECT document FROM {} ORDER BY id", self.collection);
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .unwrap()
            .into_iter()
            .map(|row| serde_json::from_str(row.get::<&str, _>("document")).unwrap())
            .collect()
    }
}
