//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logsentinel_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use logsentinel_core::metrics as m;
//!
//! metrics::counter!(m::THREATS_DETECTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 모듈 레이블 키
pub const LABEL_MODULE: &str = "module";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Tail / Publish 메트릭 ──────────────────────────────────────────

/// Tail: 읽은 라인 수 (counter)
pub const LINES_TAILED_TOTAL: &str = "logsentinel_lines_tailed_total";

/// Tail: truncation/rotation 감지 후 재오픈 횟수 (counter)
pub const TAIL_REOPENS_TOTAL: &str = "logsentinel_tail_reopens_total";

/// Publish: 브로커에 추가된 메시지 수 (counter)
pub const MESSAGES_PUBLISHED_TOTAL: &str = "logsentinel_messages_published_total";

/// Publish: 재시도 횟수 (counter)
pub const PUBLISH_RETRIES_TOTAL: &str = "logsentinel_publish_retries_total";

/// Publish: 재시도 소진 후 최종 실패 수 (counter)
pub const PUBLISH_FAILURES_TOTAL: &str = "logsentinel_publish_failures_total";

/// Publish: 발행 지연 시간 (histogram, 초, 재시도 포함)
pub const PUBLISH_DURATION_SECONDS: &str = "logsentinel_publish_duration_seconds";

// ─── Consume / Classify 메트릭 ──────────────────────────────────────

/// Consume: 수신한 메시지 수 (counter)
pub const MESSAGES_CONSUMED_TOTAL: &str = "logsentinel_messages_consumed_total";

/// Classify: 위협으로 분류된 메시지 수 (counter)
pub const THREATS_DETECTED_TOTAL: &str = "logsentinel_threats_detected_total";

/// Persist: 저장된 알림 수 (counter)
pub const ALERTS_PERSISTED_TOTAL: &str = "logsentinel_alerts_persisted_total";

/// Persist: 저장 실패 수 (counter)
pub const ALERT_PERSIST_FAILURES_TOTAL: &str = "logsentinel_alert_persist_failures_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logsentinel_daemon_uptime_seconds";

/// Daemon: 등록된 모듈 수 (gauge)
pub const DAEMON_MODULES_REGISTERED: &str = "logsentinel_daemon_modules_registered";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 발행 지연 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 30s 범위 (재시도 백오프 포함)
pub const PUBLISH_DURATION_BUCKETS: [f64; 9] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logsentinel-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        LINES_TAILED_TOTAL,
        "Total number of lines read from the watched file"
    );
    describe_counter!(
        TAIL_REOPENS_TOTAL,
        "Total number of times the watched file was reopened after truncation or rotation"
    );
    describe_counter!(
        MESSAGES_PUBLISHED_TOTAL,
        "Total number of log lines appended to the broker topic"
    );
    describe_counter!(
        PUBLISH_RETRIES_TOTAL,
        "Total number of publish retries after transient broker errors"
    );
    describe_counter!(
        PUBLISH_FAILURES_TOTAL,
        "Total number of log lines dropped after exhausting publish retries"
    );
    describe_histogram!(
        PUBLISH_DURATION_SECONDS,
        "Time to publish a single line including retries, in seconds"
    );

    describe_counter!(
        MESSAGES_CONSUMED_TOTAL,
        "Total number of messages read from the broker by this consumer"
    );
    describe_counter!(
        THREATS_DETECTED_TOTAL,
        "Total number of messages classified as threats"
    );
    describe_counter!(
        ALERTS_PERSISTED_TOTAL,
        "Total number of alert records written to the alert store"
    );
    describe_counter!(
        ALERT_PERSIST_FAILURES_TOTAL,
        "Total number of threat messages whose alert insert failed"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "LogSentinel daemon uptime in seconds");
    describe_gauge!(
        DAEMON_MODULES_REGISTERED,
        "Number of modules registered in the daemon"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        LINES_TAILED_TOTAL,
        TAIL_REOPENS_TOTAL,
        MESSAGES_PUBLISHED_TOTAL,
        PUBLISH_RETRIES_TOTAL,
        PUBLISH_FAILURES_TOTAL,
        PUBLISH_DURATION_SECONDS,
        MESSAGES_CONSUMED_TOTAL,
        THREATS_DETECTED_TOTAL,
        ALERTS_PERSISTED_TOTAL,
        ALERT_PERSIST_FAILURES_TOTAL,
        DAEMON_UPTIME_SECONDS,
        DAEMON_MODULES_REGISTERED,
    ];

    #[test]
    fn all_metrics_start_with_logsentinel_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("logsentinel_"),
                "Metric '{}' does not start with 'logsentinel_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            if name.contains("_seconds") || *name == DAEMON_MODULES_REGISTERED {
                continue;
            }
            assert!(name.ends_with("_total"), "counter '{}' lacks _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 설치되지 않아도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn publish_duration_buckets_are_sorted() {
        let buckets = PUBLISH_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(buckets[i] > buckets[i - 1]);
        }
    }
}
