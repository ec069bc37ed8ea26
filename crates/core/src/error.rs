//! 에러 타입 — 도메인별 에러 정의

/// LogSentinel 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 알림 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 메시지 브로커 에러
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 알림 저장소 에러
///
/// 저장소 경계(`insert`, `recent`)에서 발생하는 모든 실패를 표현합니다.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),
}

/// 메시지 브로커 에러
///
/// `Transient`만 재시도 대상입니다. `Closed`는 종료 신호나
/// 복구 불가능한 연결 손실을 의미하며 소비 루프를 끝냅니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// 일시적 실패 (브로커 미도달, 리더 변경, 큐 포화 등)
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// 브로커가 요청을 거부함 (재시도해도 성공하지 않음)
    #[error("broker rejected request: {0}")]
    Rejected(String),

    /// 클라이언트가 닫힘
    #[error("broker client closed")]
    Closed,
}

impl BrokerError {
    /// 재시도로 회복될 수 있는 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
