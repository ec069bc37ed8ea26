//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 수집(tail) → 발행(publish) → 소비/분류(consume/classify) → 저장(persist)
//! 흐름에서 각 단계가 주고받는 데이터 구조를 정의합니다.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 감시 파일에서 읽은 한 줄
///
/// 줄바꿈(`\n`, `\r\n`)은 제거된 상태이며 나머지 바이트는 원본 그대로입니다.
/// Tail Source가 생성하고 Publisher가 한 번 소비합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 원시 라인 바이트
    pub data: Bytes,
    /// 읽은 시각
    pub read_at: SystemTime,
}

impl LogLine {
    /// 새 LogLine을 생성합니다.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            read_at: SystemTime::now(),
        }
    }

    /// UTF-8로 디코딩한 텍스트를 반환합니다 (잘못된 바이트는 대체 문자로 치환).
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// 라인 길이 (바이트)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 빈 라인인지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// 브로커로 전달되는 메시지
///
/// Publisher가 소유하다가 브로커에 넘기며, 추가된 뒤에는 변경되지 않습니다.
/// 오프셋은 브로커가 파티션 단위로 부여합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 파티셔닝 키 (소비자는 해석하지 않음)
    pub key: Bytes,
    /// 원시 라인 바이트
    pub value: Bytes,
    /// 명시적 파티션 지정 (None이면 키 해시로 결정)
    pub partition: Option<i32>,
}

impl Message {
    /// 키와 값으로 메시지를 생성합니다.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            partition: None,
        }
    }

    /// 파티션을 명시적으로 지정합니다.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// 값을 UTF-8 텍스트로 디코딩합니다.
    pub fn value_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// 분류 결과
///
/// 저장되지 않는 파생 값입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// 위협 여부
    pub is_threat: bool,
    /// 분류 대상 원문
    pub message: String,
}

/// 저장된 위협 알림
///
/// 위협으로 분류된 메시지마다 한 번 생성되며 (at-least-once 전달에 따라 중복 가능),
/// 생성 후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// 저장소가 부여한 대리 키
    pub id: i64,
    /// 위협으로 분류된 원문 메시지
    pub message: String,
    /// 저장 시각
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{}] {}",
            self.id,
            self.created_at.to_rfc3339(),
            self.message
        )
    }
}
