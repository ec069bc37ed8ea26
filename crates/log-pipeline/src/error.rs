//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 로그 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogPipelineError> for SentinelError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use logsentinel_core::error::{BrokerError, PipelineError, SentinelError, StorageError};

/// 로그 파이프라인 도메인 에러
///
/// tail, 발행, 소비, 저장, 채널 통신 등 파이프라인 내부의
/// 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 감시 파일 접근 불가 (tail 시퀀스 종료)
    #[error("tail error: {path}: {reason}")]
    Tail {
        /// 감시 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 브로커 에러
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// 알림 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LogPipelineError> for SentinelError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Broker(e) => SentinelError::Broker(e),
            LogPipelineError::Storage(e) => SentinelError::Storage(e),
            LogPipelineError::Io(e) => SentinelError::Io(e),
            other => SentinelError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
