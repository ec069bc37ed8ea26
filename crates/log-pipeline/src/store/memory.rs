//! 인메모리 알림 저장소

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use logsentinel_core::error::StorageError;
use logsentinel_core::types::AlertRecord;

use super::AlertStore;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<AlertRecord>,
    next_id: i64,
}

/// 인메모리 알림 저장소
///
/// id는 1부터 증가하며, `created_at`은 insert 시점에 시계가 돌려준 시각입니다.
#[derive(Debug)]
pub struct MemoryAlertStore {
    table: Mutex<Table>,
    clock: fn() -> DateTime<Utc>,
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::with_clock(Utc::now)
    }
}

impl MemoryAlertStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `created_at`을 `clock`으로 찍는 빈 저장소를 생성합니다.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            clock,
        }
    }

    /// 저장된 알림 수
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AlertStore for MemoryAlertStore {
    async fn insert(&self, message: &str) -> Result<AlertRecord, StorageError> {
        let mut table = self.lock();
        table.next_id += 1;
        let record = AlertRecord {
            id: table.next_id,
            message: message.to_owned(),
            created_at: (self.clock)(),
        };
        table.rows.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
        let table = self.lock();
        let mut rows: Vec<AlertRecord> = table.rows.clone();
        drop(table);

        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = MemoryAlertStore::new();
        let a = store.insert("ALERT: one").await.unwrap();
        let b = store.insert("ALERT: two").await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(b.created_at >= a.created_at);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = MemoryAlertStore::new();
        for i in 0..15 {
            store.insert(&format!("ALERT: {i}")).await.unwrap();
        }

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].message, "ALERT: 14");
        assert_eq!(recent[9].message, "ALERT: 5");
        for pair in recent.windows(2) {
            assert!(
                (pair[0].created_at, pair[0].id) > (pair[1].created_at, pair[1].id),
                "rows must be strictly ordered by created_at then id"
            );
        }
    }

    fn frozen_clock() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    #[tokio::test]
    async fn equal_timestamps_order_by_id_descending() {
        let store = MemoryAlertStore::with_clock(frozen_clock);
        for i in 1..=3 {
            store.insert(&format!("ALERT: {i}")).await.unwrap();
        }

        let recent = store.recent(10).await.unwrap();
        assert!(recent.iter().all(|r| r.created_at == frozen_clock()));
        let ids: Vec<i64> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(recent[0].message, "ALERT: 3");
    }

    #[tokio::test]
    async fn empty_store_returns_no_rows() {
        let store = MemoryAlertStore::new();
        assert!(store.recent(10).await.unwrap().is_empty());
        assert!(store.is_empty());
        store.ping().await.unwrap();
    }
}
