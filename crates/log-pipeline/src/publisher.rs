//! Publisher -- tail한 라인을 브로커 토픽에 발행합니다.
//!
//! 각 라인은 초 단위 시간 버킷에서 만든 키(`Key-{unix_secs}`)와 원시 바이트 값으로
//! [`Message`]가 됩니다. 같은 초에 읽힌 라인들은 같은 파티션으로 모입니다.
//!
//! 일시적 브로커 에러(`BrokerError::Transient`, 타임아웃 포함)만 지수 백오프로
//! 재시도합니다. 재시도를 소진하거나 영구 에러가 나면 호출자에게 돌려주며,
//! 호출자는 로그를 남기고 다음 라인으로 넘어갑니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use logsentinel_core::error::BrokerError;
use logsentinel_core::metrics as m;
use logsentinel_core::types::{LogLine, Message};

use crate::broker::{Broker, Delivery};
use crate::config::PublisherSettings;
use crate::error::LogPipelineError;

/// 시각으로부터 파티셔닝 키를 만듭니다.
pub fn message_key(at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("Key-{secs}")
}

/// 발행 성공 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// 브로커가 부여한 위치
    pub delivery: Delivery,
    /// 성공까지 걸린 시도 횟수
    pub attempts: u32,
}

/// Publisher 통계 (파이프라인 health check와 공유)
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl PublisherStats {
    /// 발행 성공한 라인 수
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 최종 실패한 라인 수
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// 현재 연속 실패 수 (성공 시 0으로 초기화)
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// 브로커 Publisher
pub struct Publisher<B: Broker> {
    broker: Arc<B>,
    settings: PublisherSettings,
    stats: Arc<PublisherStats>,
}

impl<B: Broker> Publisher<B> {
    /// 주입된 브로커 클라이언트로 Publisher를 생성합니다.
    pub fn new(broker: Arc<B>, settings: PublisherSettings) -> Result<Self, LogPipelineError> {
        settings.validate()?;
        Ok(Self {
            broker,
            settings,
            stats: Arc::new(PublisherStats::default()),
        })
    }

    /// 공유 통계 핸들
    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// 설정
    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// 라인 하나를 발행합니다. 성공하거나 재시도를 소진할 때까지 반환하지 않습니다.
    pub async fn publish(&self, line: &LogLine) -> Result<Ack, LogPipelineError> {
        let message = Message::new(message_key(line.read_at), line.data.clone());
        let policy = &self.settings.retry;
        let started = Instant::now();

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                policy.attempt_timeout,
                self.broker.append(&self.settings.topic, message.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(BrokerError::Transient(format!(
                    "append timed out after {}ms",
                    policy.attempt_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(delivery) => break Ok(delivery),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying"
                    );
                    metrics::counter!(m::PUBLISH_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => break Err(e),
            }
        };

        metrics::histogram!(m::PUBLISH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match result {
            Ok(delivery) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                self.stats.consecutive_failures.store(0, Ordering::Relaxed);
                metrics::counter!(m::MESSAGES_PUBLISHED_TOTAL).increment(1);
                debug!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempts = attempt,
                    "line published"
                );
                Ok(Ack {
                    delivery,
                    attempts: attempt,
                })
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let consecutive = self.stats.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(m::PUBLISH_FAILURES_TOTAL).increment(1);
                error!(
                    attempts = attempt,
                    consecutive_failures = consecutive,
                    error = %e,
                    "publish failed"
                );
                Err(e.into())
            }
        }
    }
}
