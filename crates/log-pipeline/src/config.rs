//! 로그 파이프라인 설정
//!
//! core의 문자열 기반 설정 섹션([`TailConfig`], [`BrokerConfig`], [`ConsumerConfig`])을
//! 파이프라인 내부에서 쓰는 타입 있는 설정으로 변환합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logsentinel_core::config::LogSentinelConfig;
//! use logsentinel_log_pipeline::config::{TailSettings, PublisherSettings};
//!
//! let core = LogSentinelConfig::default();
//! let tail = TailSettings::from_core(&core.tail)?;
//! let publisher = PublisherSettings::from_core(&core.broker)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use logsentinel_core::config::{BrokerConfig, ConsumerConfig, TailConfig};

use crate::error::LogPipelineError;

fn config_error(field: &str, reason: impl Into<String>) -> LogPipelineError {
    LogPipelineError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// tail 시작 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    /// 파일 처음부터 (기본값)
    #[default]
    Beginning,
    /// 현재 파일 끝부터 (이후 추가분만)
    End,
}

impl std::str::FromStr for StartPosition {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            other => Err(config_error(
                "start_from",
                format!("unknown start position '{other}'"),
            )),
        }
    }
}

/// 파일 tail 설정
#[derive(Debug, Clone)]
pub struct TailSettings {
    /// 감시할 파일 경로
    pub path: PathBuf,
    /// 시작 위치
    pub start_from: StartPosition,
    /// 새 데이터/회전 확인 주기
    pub poll_interval: Duration,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 파일이 없으면 빈 파일 생성
    pub create_if_missing: bool,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("app.log"),
            start_from: StartPosition::Beginning,
            poll_interval: Duration::from_millis(250),
            max_line_length: 64 * 1024,
            create_if_missing: true,
        }
    }
}

impl TailSettings {
    /// core의 `TailConfig`에서 tail 설정을 생성합니다.
    pub fn from_core(core: &TailConfig) -> Result<Self, LogPipelineError> {
        let settings = Self {
            path: PathBuf::from(&core.path),
            start_from: core.start_from.parse()?,
            poll_interval: Duration::from_millis(core.poll_interval_ms),
            max_line_length: core.max_line_length,
            create_if_missing: core.create_if_missing,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.path.as_os_str().is_empty() {
            return Err(config_error("path", "watched path must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error("poll_interval", "must be greater than 0"));
        }
        if self.max_line_length == 0 {
            return Err(config_error("max_line_length", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 발행 재시도 정책
///
/// `max_attempts`는 첫 시도를 포함합니다. 재시도 간격은
/// `backoff_base * 2^(n-1)`로 늘어나며 `backoff_max`에서 멈춥니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수
    pub max_attempts: u32,
    /// 첫 재시도 대기 시간
    pub backoff_base: Duration,
    /// 재시도 대기 상한
    pub backoff_max: Duration,
    /// 한 번의 append 호출 타임아웃
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(2000),
            attempt_timeout: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// `retry`번째 재시도(1부터) 전에 기다릴 시간을 계산합니다.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Publisher 설정
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// 발행 대상 토픽
    pub topic: String,
    /// 재시도 정책
    pub retry: RetryPolicy,
    /// 비정상 판정까지 허용하는 연속 실패 수
    pub max_consecutive_failures: u32,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            topic: "logs".to_owned(),
            retry: RetryPolicy::default(),
            max_consecutive_failures: 10,
        }
    }
}

impl PublisherSettings {
    /// core의 `BrokerConfig`에서 발행 설정을 생성합니다.
    pub fn from_core(core: &BrokerConfig) -> Result<Self, LogPipelineError> {
        let settings = Self {
            topic: core.topic.clone(),
            retry: RetryPolicy {
                max_attempts: core.retry_max_attempts,
                backoff_base: Duration::from_millis(core.retry_backoff_base_ms),
                backoff_max: Duration::from_millis(core.retry_backoff_max_ms),
                attempt_timeout: Duration::from_millis(core.publish_timeout_ms),
            },
            max_consecutive_failures: core.max_consecutive_failures,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.topic.is_empty() {
            return Err(config_error("topic", "must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts", "must be greater than 0"));
        }
        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(config_error(
                "retry.backoff_base",
                "must not exceed retry.backoff_max",
            ));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(config_error("retry.attempt_timeout", "must be greater than 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(config_error(
                "max_consecutive_failures",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 오프셋 커밋 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitPolicy {
    /// `next()` 성공 시 브로커가 자동 커밋 (저장 실패해도 진행)
    #[default]
    Auto,
    /// 알림 저장 성공 후에만 커밋 (비위협 메시지는 즉시 커밋)
    AfterPersist,
}

impl std::str::FromStr for CommitPolicy {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "after_persist" => Ok(Self::AfterPersist),
            other => Err(config_error(
                "commit_policy",
                format!("unknown commit policy '{other}'"),
            )),
        }
    }
}

/// 소비/분류 설정
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// 구독 토픽
    pub topic: String,
    /// 소비자 그룹 ID
    pub group_id: String,
    /// 오프셋 커밋 정책
    pub commit_policy: CommitPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: "logs".to_owned(),
            group_id: "log-sentinel-group".to_owned(),
            commit_policy: CommitPolicy::Auto,
        }
    }
}

impl ConsumerSettings {
    /// core의 브로커/소비자 설정에서 소비 설정을 생성합니다.
    pub fn from_core(
        broker: &BrokerConfig,
        consumer: &ConsumerConfig,
    ) -> Result<Self, LogPipelineError> {
        let settings = Self {
            topic: broker.topic.clone(),
            group_id: broker.group_id.clone(),
            commit_policy: consumer.commit_policy.parse()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.topic.is_empty() {
            return Err(config_error("topic", "must not be empty"));
        }
        if self.group_id.is_empty() {
            return Err(config_error("group_id", "must not be empty"));
        }
        Ok(())
    }
}
