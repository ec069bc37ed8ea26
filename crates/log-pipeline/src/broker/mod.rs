//! 메시지 브로커 추상화
//!
//! [`Broker`] trait은 파티션된 append 로그와 소비자 그룹 오프셋 관리를 제공하는
//! 외부 브로커를 추상화합니다. 운영에서는 Kafka 클라이언트(`kafka` feature)를,
//! 단일 프로세스 실행과 테스트에서는 [`MemoryBroker`]를 사용합니다.
//!
//! # 아키텍처
//!
//! ```text
//!  Publisher ──append──▶ ┌────────┐ ◀──next/commit── DetectionPipeline
//!                        │ Broker │ (trait)
//!                        └────────┘
//!                          │    │
//!                          ▼    ▼
//!                     ┌──────┐ ┌───────┐
//!                     │Memory│ │ Kafka │
//!                     └──────┘ └───────┘
//! ```
//!
//! # 에러 분류
//!
//! - `BrokerError::Transient`: 재시도하면 회복될 수 있음 (Publisher가 재시도)
//! - `BrokerError::Rejected`: 재시도해도 실패함
//! - `BrokerError::Closed`: 클라이언트 종료 (소비 루프 종료 조건)

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaConsumer};
pub use memory::{MemoryBroker, MemoryConsumer};

use std::future::Future;

use bytes::Bytes;

use logsentinel_core::error::BrokerError;
use logsentinel_core::types::Message;

/// append 결과 (브로커가 부여한 위치)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// 메시지가 기록된 파티션
    pub partition: i32,
    /// 파티션 내 오프셋
    pub offset: i64,
}

/// 소비자가 받은 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// 토픽명
    pub topic: String,
    /// 파티션
    pub partition: i32,
    /// 파티션 내 오프셋
    pub offset: i64,
    /// 파티셔닝 키
    pub key: Bytes,
    /// 원시 라인 바이트
    pub value: Bytes,
}

impl ConsumedMessage {
    /// 값을 UTF-8 텍스트로 디코딩합니다 (잘못된 바이트는 대체 문자로 치환).
    pub fn value_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// 오프셋 커밋 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// `next()`가 성공하면 브로커가 자동으로 커밋
    #[default]
    Auto,
    /// 호출자가 [`BrokerConsumer::commit`]으로 명시적으로 커밋
    Manual,
}

/// 메시지 브로커 클라이언트
///
/// 구현체는 `Arc`로 공유되어 Publisher와 소비 파이프라인에 주입됩니다.
pub trait Broker: Send + Sync + 'static {
    /// 구독 핸들 타입
    type Consumer: BrokerConsumer;

    /// 토픽에 메시지를 추가합니다.
    ///
    /// 파티션은 `message.partition`이 지정되면 그 값을, 아니면 키 해시로 결정합니다.
    fn append(
        &self,
        topic: &str,
        message: Message,
    ) -> impl Future<Output = Result<Delivery, BrokerError>> + Send;

    /// 소비자 그룹에 참여하여 토픽을 구독합니다.
    ///
    /// 같은 그룹의 구독자들은 파티션을 나눠 가지며, 참여/이탈 시 재분배됩니다.
    fn subscribe(
        &self,
        group_id: &str,
        topic: &str,
        mode: CommitMode,
    ) -> impl Future<Output = Result<Self::Consumer, BrokerError>> + Send;
}

/// 소비자 그룹 구독 핸들
///
/// 핸들을 drop하면 그룹에서 이탈합니다.
pub trait BrokerConsumer: Send + 'static {
    /// 할당된 파티션에서 다음 메시지를 기다려 반환합니다.
    ///
    /// 파티션 내 순서만 보장됩니다. 에러는 소비 루프를 끝내는 신호입니다.
    fn next(&mut self) -> impl Future<Output = Result<ConsumedMessage, BrokerError>> + Send;

    /// 메시지까지의 진행을 그룹 오프셋으로 커밋합니다 (다음 읽기 위치 = offset + 1).
    ///
    /// `CommitMode::Auto` 구독에서는 호출할 필요가 없습니다.
    fn commit(
        &mut self,
        message: &ConsumedMessage,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
