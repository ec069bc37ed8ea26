//! 알림 저장소 추상화
//!
//! [`AlertStore`]는 위협으로 분류된 메시지를 영속화하는 외부 저장소를 추상화합니다.
//! 단일 행 insert의 원자성 외에는 트랜잭션을 요구하지 않습니다.
//!
//! - [`MemoryAlertStore`]: 프로세스 내 저장소 (단일 프로세스 실행, 테스트)
//! - [`PgAlertStore`]: PostgreSQL `alerts` 테이블

pub mod memory;
pub mod postgres;

pub use memory::MemoryAlertStore;
pub use postgres::PgAlertStore;

use std::future::Future;

use logsentinel_core::error::StorageError;
use logsentinel_core::types::AlertRecord;

/// 알림 저장소
///
/// 구현체는 `Arc`로 공유되어 소비 파이프라인과 조회 API에 주입됩니다.
pub trait AlertStore: Send + Sync + 'static {
    /// 알림을 저장합니다. id와 생성 시각은 저장소가 부여합니다.
    fn insert(
        &self,
        message: &str,
    ) -> impl Future<Output = Result<AlertRecord, StorageError>> + Send;

    /// 최근 알림을 최신순(`created_at DESC, id DESC`)으로 최대 `limit`개 반환합니다.
    fn recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AlertRecord>, StorageError>> + Send;

    /// 저장소 연결 상태를 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 연결 자원을 반납합니다. 모든 사용자가 멈춘 뒤 한 번 호출됩니다.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
