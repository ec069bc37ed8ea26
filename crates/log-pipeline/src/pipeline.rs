//! 파이프라인 오케스트레이션 -- tail/발행, 소비/분류/저장의 두 흐름을 관리합니다.
//!
//! [`IngestPipeline`]과 [`DetectionPipeline`]은 core의
//! [`Pipeline`](logsentinel_core::pipeline::Pipeline) trait을 구현하여
//! `logsentinel-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! IngestPipeline:    FileTailer -> Publisher -> Broker(topic)
//! DetectionPipeline: Broker(group) -> classify -> AlertStore.insert -> (commit)
//! ```
//!
//! 각 파이프라인은 태스크 하나에서 한 번에 하나의 블로킹 호출만 수행합니다.
//! `stop()`은 진행 중인 호출을 취소하고 태스크 종료를 기다립니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logsentinel_core::error::{BrokerError, PipelineError, SentinelError};
use logsentinel_core::metrics as m;
use logsentinel_core::pipeline::{HealthStatus, Pipeline, PipelineFailure};

use crate::broker::{Broker, BrokerConsumer, CommitMode, ConsumedMessage};
use crate::classifier;
use crate::collector::FileTailer;
use crate::config::{CommitPolicy, ConsumerSettings, PublisherSettings, TailSettings};
use crate::error::LogPipelineError;
use crate::publisher::{Publisher, PublisherStats};
use crate::store::AlertStore;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

impl PipelineState {
    fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// 루프 종료를 기록하고, 구독자가 있으면 보고합니다.
async fn report_failure(
    slot: &OnceLock<String>,
    failure_tx: Option<&mpsc::Sender<PipelineFailure>>,
    pipeline: &str,
    reason: String,
) {
    let _ = slot.set(reason.clone());
    if let Some(tx) = failure_tx {
        if tx.send(PipelineFailure::new(pipeline, reason)).await.is_err() {
            debug!(pipeline, "failure receiver dropped");
        }
    }
}

async fn join_task<T>(task: Option<JoinHandle<T>>, name: &str) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!(pipeline = name, error = %e, "pipeline task ended abnormally");
        }
    }
}

// =============================================================================
// Ingest: tail -> publish
// =============================================================================

/// 수집/발행 파이프라인 -- 감시 파일의 새 라인을 브로커 토픽으로 보냅니다.
///
/// # 사용 예시
/// ```ignore
/// let mut ingest = IngestPipelineBuilder::new(Arc::new(MemoryBroker::default()))
///     .tail(tail_settings)
///     .publisher(publisher_settings)
///     .build()?;
/// ingest.start().await?;
/// ```
pub struct IngestPipeline<B: Broker> {
    broker: Arc<B>,
    tail: TailSettings,
    publisher: PublisherSettings,
    state: PipelineState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Option<Arc<PublisherStats>>,
    /// tail 소스가 끝난 사유
    failure: Arc<OnceLock<String>>,
    failure_tx: Option<mpsc::Sender<PipelineFailure>>,
}

impl<B: Broker> IngestPipeline<B> {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        self.state.name()
    }

    /// 발행 성공한 라인 수
    pub fn published_count(&self) -> u64 {
        self.stats.as_ref().map_or(0, |s| s.published())
    }

    /// 발행 최종 실패한 라인 수
    pub fn failed_count(&self) -> u64 {
        self.stats.as_ref().map_or(0, |s| s.failed())
    }
}

async fn run_ingest<B: Broker>(
    mut tailer: FileTailer,
    publisher: Publisher<B>,
    cancel: CancellationToken,
) -> Result<(), LogPipelineError> {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = tailer.next_line() => line?,
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            // 실패는 Publisher가 기록하고, 다음 라인으로 진행한다
            _ = publisher.publish(&line) => {}
        }
    }
}

impl<B: Broker> Pipeline for IngestPipeline<B> {
    async fn start(&mut self) -> Result<(), SentinelError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(path = %self.tail.path.display(), topic = %self.publisher.topic, "starting ingest pipeline");

        let tailer = FileTailer::open(self.tail.clone()).await?;
        let publisher = Publisher::new(Arc::clone(&self.broker), self.publisher.clone())?;
        let cancel = CancellationToken::new();
        let failure = Arc::new(OnceLock::new());
        let failure_tx = self.failure_tx.clone();

        self.stats = Some(publisher.stats());
        self.failure = Arc::clone(&failure);
        self.cancel = cancel.clone();
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = run_ingest(tailer, publisher, cancel).await {
                error!(error = %e, "ingest pipeline terminated");
                report_failure(&failure, failure_tx.as_ref(), "ingest", e.to_string()).await;
            }
        }));

        self.state = PipelineState::Running;
        info!("ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SentinelError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping ingest pipeline");
        self.cancel.cancel();
        join_task(self.task.take(), "ingest").await;

        self.state = PipelineState::Stopped;
        info!(
            published = self.published_count(),
            failed = self.failed_count(),
            "ingest pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if let Some(reason) = self.failure.get() {
                    return HealthStatus::Unhealthy(format!("tail source failed: {reason}"));
                }
                let consecutive = self.stats.as_ref().map_or(0, |s| s.consecutive_failures());
                let limit = self.publisher.max_consecutive_failures;
                if consecutive >= limit {
                    HealthStatus::Unhealthy(format!(
                        "{consecutive} consecutive publish failures (limit {limit})"
                    ))
                } else if consecutive > 0 {
                    HealthStatus::Degraded(format!("{consecutive} consecutive publish failures"))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 수집/발행 파이프라인 빌더
pub struct IngestPipelineBuilder<B: Broker> {
    broker: Arc<B>,
    tail: TailSettings,
    publisher: PublisherSettings,
    failure_tx: Option<mpsc::Sender<PipelineFailure>>,
}

impl<B: Broker> IngestPipelineBuilder<B> {
    /// 주입된 브로커 클라이언트로 빌더를 생성합니다.
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            tail: TailSettings::default(),
            publisher: PublisherSettings::default(),
            failure_tx: None,
        }
    }

    /// tail 설정을 지정합니다.
    pub fn tail(mut self, settings: TailSettings) -> Self {
        self.tail = settings;
        self
    }

    /// 발행 설정을 지정합니다.
    pub fn publisher(mut self, settings: PublisherSettings) -> Self {
        self.publisher = settings;
        self
    }

    /// tail 소스가 끝났을 때 보고할 채널을 지정합니다.
    pub fn failure_sender(mut self, tx: mpsc::Sender<PipelineFailure>) -> Self {
        self.failure_tx = Some(tx);
        self
    }

    /// 설정을 검증하고 파이프라인을 생성합니다.
    pub fn build(self) -> Result<IngestPipeline<B>, LogPipelineError> {
        self.tail.validate()?;
        self.publisher.validate()?;

        Ok(IngestPipeline {
            broker: self.broker,
            tail: self.tail,
            publisher: self.publisher,
            state: PipelineState::Initialized,
            cancel: CancellationToken::new(),
            task: None,
            stats: None,
            failure: Arc::new(OnceLock::new()),
            failure_tx: self.failure_tx,
        })
    }
}

// =============================================================================
// Detection: consume -> classify -> persist
// =============================================================================

/// 소비/분류 통계
#[derive(Debug, Default)]
pub struct DetectionStats {
    consumed: AtomicU64,
    threats: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    last_persist_failed: AtomicBool,
}

impl DetectionStats {
    /// 수신한 메시지 수
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// 위협으로 분류된 메시지 수
    pub fn threats(&self) -> u64 {
        self.threats.load(Ordering::Relaxed)
    }

    /// 저장된 알림 수
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// 저장 실패 수
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}

/// 소비/분류 파이프라인 -- 소비자 그룹으로 메시지를 받아 위협을 저장합니다.
///
/// 저장 실패는 기록만 하고 진행합니다. `CommitPolicy::Auto`에서는 오프셋이
/// 이미 커밋되었으므로 그 알림은 다시 전달되지 않습니다. `CommitPolicy::AfterPersist`에서는
/// 실패한 메시지 앞까지만 커밋하므로 재시작이나 리밸런스 후 다시 전달됩니다.
pub struct DetectionPipeline<B: Broker, S: AlertStore> {
    broker: Arc<B>,
    store: Arc<S>,
    settings: ConsumerSettings,
    state: PipelineState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<DetectionStats>,
    /// 소비 루프가 끝난 사유
    exit_reason: Arc<OnceLock<String>>,
    failure_tx: Option<mpsc::Sender<PipelineFailure>>,
}

impl<B: Broker, S: AlertStore> DetectionPipeline<B, S> {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        self.state.name()
    }

    /// 공유 통계 핸들
    pub fn stats(&self) -> Arc<DetectionStats> {
        Arc::clone(&self.stats)
    }
}

/// `CommitPolicy::AfterPersist`에서 저장에 실패한 메시지 뒤로 커밋이 넘어가지 않게 막습니다.
///
/// 파티션별로 저장에 실패한 가장 앞선 오프셋을 기억하고, 그 메시지가
/// 다시 전달되어 저장될 때까지 그 파티션의 이후 커밋을 보류합니다.
#[derive(Debug, Default)]
struct CommitGate {
    blocked: HashMap<i32, i64>,
}

impl CommitGate {
    /// 처리 결과를 반영하고 이 메시지를 커밋해도 되는지 반환합니다.
    fn admit(&mut self, message: &ConsumedMessage, persisted: bool) -> bool {
        let blocked_at = self.blocked.get(&message.partition).copied();
        match (blocked_at, persisted) {
            (Some(at), true) if message.offset == at => {
                self.blocked.remove(&message.partition);
                true
            }
            (Some(at), true) => message.offset < at,
            (Some(at), false) if message.offset >= at => false,
            (_, false) => {
                self.blocked.insert(message.partition, message.offset);
                false
            }
            (None, true) => true,
        }
    }

    fn is_blocked(&self, partition: i32) -> bool {
        self.blocked.contains_key(&partition)
    }
}

/// 메시지 하나를 분류하고, 위협이면 저장합니다.
///
/// 비위협 메시지이거나 저장에 성공하면 `true`를 반환합니다.
async fn process_message<S: AlertStore>(
    store: &S,
    stats: &DetectionStats,
    message: &ConsumedMessage,
) -> bool {
    stats.consumed.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(m::MESSAGES_CONSUMED_TOTAL).increment(1);

    let classification = classifier::classify(&message.value_text());
    if !classification.is_threat {
        debug!(
            partition = message.partition,
            offset = message.offset,
            "benign message"
        );
        return true;
    }

    stats.threats.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(m::THREATS_DETECTED_TOTAL).increment(1);
    warn!(
        partition = message.partition,
        offset = message.offset,
        message = %classification.message,
        "threat detected"
    );

    match store.insert(&classification.message).await {
        Ok(record) => {
            stats.persisted.fetch_add(1, Ordering::Relaxed);
            stats.last_persist_failed.store(false, Ordering::Relaxed);
            metrics::counter!(m::ALERTS_PERSISTED_TOTAL).increment(1);
            debug!(id = record.id, "alert persisted");
            true
        }
        Err(e) => {
            stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            stats.last_persist_failed.store(true, Ordering::Relaxed);
            metrics::counter!(m::ALERT_PERSIST_FAILURES_TOTAL).increment(1);
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "failed to persist alert"
            );
            false
        }
    }
}

async fn run_detection<C: BrokerConsumer, S: AlertStore>(
    mut consumer: C,
    store: Arc<S>,
    policy: CommitPolicy,
    stats: Arc<DetectionStats>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    let mut gate = CommitGate::default();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = consumer.next() => next?,
        };

        let persisted = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            persisted = process_message(store.as_ref(), &stats, &message) => persisted,
        };

        if policy != CommitPolicy::AfterPersist {
            continue;
        }
        if !gate.admit(&message, persisted) {
            if persisted && gate.is_blocked(message.partition) {
                debug!(
                    partition = message.partition,
                    offset = message.offset,
                    "commit held behind failed insert"
                );
            }
            continue;
        }
        if let Err(e) = consumer.commit(&message).await {
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "failed to commit offset"
            );
        }
    }
}

impl<B: Broker, S: AlertStore> Pipeline for DetectionPipeline<B, S> {
    async fn start(&mut self) -> Result<(), SentinelError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let mode = match self.settings.commit_policy {
            CommitPolicy::Auto => CommitMode::Auto,
            CommitPolicy::AfterPersist => CommitMode::Manual,
        };
        info!(
            group_id = %self.settings.group_id,
            topic = %self.settings.topic,
            commit_policy = ?self.settings.commit_policy,
            "starting detection pipeline"
        );

        let consumer = self
            .broker
            .subscribe(&self.settings.group_id, &self.settings.topic, mode)
            .await?;

        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let policy = self.settings.commit_policy;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let exit_reason = Arc::new(OnceLock::new());
        let exit = Arc::clone(&exit_reason);
        let failure_tx = self.failure_tx.clone();

        self.task = Some(tokio::spawn(async move {
            if let Err(e) = run_detection(consumer, store, policy, stats, token).await {
                error!(error = %e, "consumer loop exited");
                report_failure(&exit, failure_tx.as_ref(), "detection", e.to_string()).await;
            }
        }));
        self.cancel = cancel;
        self.exit_reason = exit_reason;
        self.state = PipelineState::Running;
        info!("detection pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SentinelError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping detection pipeline");
        self.cancel.cancel();
        join_task(self.task.take(), "detection").await;

        self.state = PipelineState::Stopped;
        info!(
            consumed = self.stats.consumed(),
            threats = self.stats.threats(),
            persisted = self.stats.persisted(),
            "detection pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if let Some(reason) = self.exit_reason.get() {
                    HealthStatus::Unhealthy(format!("consumer loop exited: {reason}"))
                } else if self.stats.last_persist_failed.load(Ordering::Relaxed) {
                    HealthStatus::Degraded("last alert insert failed".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 소비/분류 파이프라인 빌더
pub struct DetectionPipelineBuilder<B: Broker, S: AlertStore> {
    broker: Arc<B>,
    store: Arc<S>,
    settings: ConsumerSettings,
    failure_tx: Option<mpsc::Sender<PipelineFailure>>,
}

impl<B: Broker, S: AlertStore> DetectionPipelineBuilder<B, S> {
    /// 주입된 브로커/저장소 클라이언트로 빌더를 생성합니다.
    pub fn new(broker: Arc<B>, store: Arc<S>) -> Self {
        Self {
            broker,
            store,
            settings: ConsumerSettings::default(),
            failure_tx: None,
        }
    }

    /// 소비 설정을 지정합니다.
    pub fn settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 소비 루프가 끝났을 때 보고할 채널을 지정합니다.
    pub fn failure_sender(mut self, tx: mpsc::Sender<PipelineFailure>) -> Self {
        self.failure_tx = Some(tx);
        self
    }

    /// 설정을 검증하고 파이프라인을 생성합니다.
    pub fn build(self) -> Result<DetectionPipeline<B, S>, LogPipelineError> {
        self.settings.validate()?;

        Ok(DetectionPipeline {
            broker: self.broker,
            store: self.store,
            settings: self.settings,
            state: PipelineState::Initialized,
            cancel: CancellationToken::new(),
            task: None,
            stats: Arc::new(DetectionStats::default()),
            exit_reason: Arc::new(OnceLock::new()),
            failure_tx: self.failure_tx,
        })
    }
}
