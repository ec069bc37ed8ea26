//! LogSentinel 공통 크레이트
//!
//! 모든 LogSentinel 크레이트가 공유하는 설정, 에러, 도메인 타입,
//! 생명주기 trait, 메트릭 이름을 정의합니다.
//!
//! # 모듈 구성
//!
//! - [`config`]: `logsentinel.toml` 파싱, 환경변수 오버라이드, 검증
//! - [`error`]: 최상위 에러 타입과 도메인 에러 (설정, 파이프라인, 저장소, 브로커)
//! - [`types`]: `LogLine`, `Message`, `Classification`, `AlertRecord`
//! - [`pipeline`]: 모듈 생명주기 trait (`Pipeline`, `DynPipeline`), `HealthStatus`, `PipelineFailure`
//! - [`metrics`]: Prometheus 메트릭 이름 상수와 설명 등록

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{BrokerError, ConfigError, PipelineError, SentinelError, StorageError};

// 설정
pub use config::LogSentinelConfig;

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline, PipelineFailure};

// 도메인 타입
pub use types::{AlertRecord, Classification, LogLine, Message};
