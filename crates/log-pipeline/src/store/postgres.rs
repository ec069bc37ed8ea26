//! PostgreSQL 알림 저장소
//!
//! `alerts` 테이블:
//!
//! | column | type | note |
//! |--------|------|------|
//! | `id` | `SERIAL` | primary key |
//! | `message` | `TEXT` | 원문 메시지 |
//! | `created_at` | `TIMESTAMP` | 기본값 `CURRENT_TIMESTAMP` |

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use logsentinel_core::error::StorageError;
use logsentinel_core::types::AlertRecord;

use super::AlertStore;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS alerts (
    id SERIAL PRIMARY KEY,
    message TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const INSERT_ALERT: &str =
    "INSERT INTO alerts (message) VALUES ($1) RETURNING id, message, created_at";

const SELECT_RECENT: &str =
    "SELECT id, message, created_at FROM alerts ORDER BY created_at DESC, id DESC LIMIT $1";

#[derive(Debug, FromRow)]
struct AlertRow {
    id: i32,
    message: Option<String>,
    created_at: Option<NaiveDateTime>,
}

impl From<AlertRow> for AlertRecord {
    fn from(row: AlertRow) -> Self {
        Self {
            id: i64::from(row.id),
            message: row.message.unwrap_or_default(),
            created_at: row
                .created_at
                .map(|ts| ts.and_utc())
                .unwrap_or_else(Utc::now),
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Connection(err.to_string()),
        other => StorageError::Query(other.to_string()),
    }
}

/// PostgreSQL 알림 저장소
#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    /// 커넥션 풀을 만들어 연결합니다.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(max_connections, "connected to postgres alert store");
        Ok(Self { pool })
    }

    /// 기존 풀로 저장소를 생성합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `alerts` 테이블이 없으면 생성합니다.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl AlertStore for PgAlertStore {
    async fn insert(&self, message: &str) -> Result<AlertRecord, StorageError> {
        let row: AlertRow = sqlx::query_as(INSERT_ALERT)
            .bind(message)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<AlertRow> = sqlx::query_as(SELECT_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(AlertRecord::from).collect())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres alert store closed");
    }
}
