//! LogSentinel 로그 파이프라인
//!
//! 감시 파일의 새 라인을 브로커 토픽으로 발행하고, 소비자 그룹으로 다시 읽어
//! `"ALERT"`가 포함된 라인을 알림 저장소에 기록합니다.
//!
//! # 모듈 구성
//!
//! - [`collector`]: 파일 tail 소스 (회전/잘림/재생성 감지)
//! - [`publisher`]: 키 생성과 재시도를 포함한 브로커 발행
//! - [`broker`]: 브로커 클라이언트 trait과 인메모리/Kafka 구현
//! - [`classifier`]: 위협 분류 규칙
//! - [`store`]: 알림 저장소 trait과 인메모리/PostgreSQL 구현
//! - [`generator`]: 테스트용 가짜 로그 생성기
//! - [`pipeline`]: 수집/탐지 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! FileTailer -> Publisher -> Broker(topic "logs") -> Consumer group -> classify -> AlertStore
//!     |             |                                                    |             |
//!  rotation    Key-{secs}, retry                                  contains "ALERT"  recent(10)
//! ```

pub mod broker;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod publisher;
pub mod store;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{
    DetectionPipeline, DetectionPipelineBuilder, DetectionStats, IngestPipeline,
    IngestPipelineBuilder,
};

// 설정
pub use config::{
    CommitPolicy, ConsumerSettings, PublisherSettings, RetryPolicy, StartPosition, TailSettings,
};

// 에러
pub use error::LogPipelineError;

// 수집기
pub use collector::FileTailer;

// 발행
pub use publisher::{Ack, Publisher, PublisherStats, message_key};

// 브로커
#[cfg(feature = "kafka")]
pub use broker::KafkaBroker;
pub use broker::{Broker, BrokerConsumer, CommitMode, ConsumedMessage, Delivery, MemoryBroker};

// 저장소
pub use store::{AlertStore, MemoryAlertStore, PgAlertStore};

// 생성기
pub use generator::{GeneratorPipeline, GeneratorSettings, LogGenerator};
