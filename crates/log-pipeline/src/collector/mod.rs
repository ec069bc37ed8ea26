//! 로그 수집 모듈 -- 감시 파일에서 새 라인을 읽어옵니다.
//!
//! # 수집 소스
//! - [`FileTailer`]: 단일 파일 감시 (tail -F 방식, 회전/truncation 복구)
//!
//! 수집 결과는 [`LogLine`](logsentinel_core::types::LogLine)이며,
//! 수집 루프가 한 라인씩 Publisher에 넘깁니다.

pub mod file;

pub use file::FileTailer;
