//! 파이프라인 trait — 모듈 생명주기 정의
//!
//! 수집/발행 파이프라인, 소비/분류 파이프라인, 조회 API 서버는 모두
//! [`Pipeline`]을 구현하여 `logsentinel-daemon`에서 동일한 방식으로
//! 시작/정지/상태 확인됩니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// `dyn` 호환 trait에서 사용하는 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능/신뢰성 저하
    Degraded(String),
    /// 비정상 (재시작 필요)
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 복구할 수 없이 끝난 파이프라인 루프 보고
///
/// tail 소스 소진과 브로커 읽기 실패가 여기에 해당합니다. 데몬은 이 보고를
/// 받으면 0이 아닌 코드로 종료하고, 재시작은 외부 감독자가 맡습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    /// 파이프라인 이름 (`ingest`, `detection`)
    pub pipeline: String,
    /// 루프가 끝난 사유
    pub reason: String,
}

impl PipelineFailure {
    /// 새 보고를 생성합니다.
    pub fn new(pipeline: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pipeline terminated: {}", self.pipeline, self.reason)
    }
}

/// 모든 모듈이 구현하는 생명주기 trait
///
/// # 생명주기
/// ```text
/// Initialized → start() → Running → stop() → Stopped
/// ```
pub trait Pipeline: Send + Sync {
    /// 모듈을 시작합니다. 백그라운드 태스크를 스폰하고 즉시 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), SentinelError>> + Send;

    /// 모듈을 정지합니다. 진행 중인 블로킹 호출을 취소하고 태스크 종료를 기다립니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), SentinelError>> + Send;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// dyn-compatible 파이프라인 trait
///
/// `Pipeline`은 RPITIT를 사용하므로 `dyn Pipeline`이 불가합니다.
/// `DynPipeline`은 `BoxFuture`를 반환하여 `Vec<Box<dyn DynPipeline>>`으로
/// 모듈을 동적으로 관리할 수 있게 합니다.
pub trait DynPipeline: Send + Sync {
    /// 모듈을 시작합니다.
    fn start(&mut self) -> BoxFuture<'_, Result<(), SentinelError>>;

    /// 모듈을 정지합니다.
    fn stop(&mut self) -> BoxFuture<'_, Result<(), SentinelError>>;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

/// Pipeline을 구현한 타입은 자동으로 DynPipeline도 구현됩니다.
impl<T: Pipeline> DynPipeline for T {
    fn start(&mut self) -> BoxFuture<'_, Result<(), SentinelError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), SentinelError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}
