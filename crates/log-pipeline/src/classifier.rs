//! 위협 분류기
//!
//! 메시지 텍스트에 `"ALERT"` 리터럴이 포함되어 있으면 위협입니다.
//! 대소문자를 구분하며 정규화하지 않습니다.

use logsentinel_core::types::Classification;

/// 위협 표식
pub const THREAT_MARKER: &str = "ALERT";

/// 텍스트가 위협인지 판단합니다.
pub fn is_threat(text: &str) -> bool {
    text.contains(THREAT_MARKER)
}

/// 메시지 텍스트를 분류합니다.
pub fn classify(text: &str) -> Classification {
    Classification {
        is_threat: is_threat(text),
        message: text.to_owned(),
    }
}
