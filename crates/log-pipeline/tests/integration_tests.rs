//! 통합 테스트 -- 파이프라인 전체 흐름 검증
//!
//! 파일에 쓴 라인이 tail -> 발행 -> 소비 -> 분류 -> 저장을 거쳐
//! 최근 알림 조회에 나타나는지 확인합니다.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use logsentinel_core::error::{BrokerError, StorageError};
use logsentinel_core::pipeline::{HealthStatus, Pipeline};
use logsentinel_core::types::{AlertRecord, Message};
use logsentinel_log_pipeline::{
    AlertStore, Broker, CommitMode, CommitPolicy, ConsumerSettings, Delivery,
    DetectionPipelineBuilder, IngestPipelineBuilder, MemoryAlertStore, MemoryBroker,
    PublisherSettings, TailSettings,
};
use logsentinel_log_pipeline::broker::MemoryConsumer;

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open watched file");
    writeln!(file, "{line}").expect("append line");
}

fn tail_settings(path: &Path) -> TailSettings {
    TailSettings {
        path: path.to_path_buf(),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn fast_retry() -> PublisherSettings {
    let mut settings = PublisherSettings::default();
    settings.retry.backoff_base = Duration::from_millis(5);
    settings.retry.backoff_max = Duration::from_millis(20);
    settings
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// 처음 `failures`번 append에 일시적 에러를 내는 브로커
struct FlakyBroker {
    inner: MemoryBroker,
    failures: AtomicU32,
}

impl Broker for FlakyBroker {
    type Consumer = MemoryConsumer;

    async fn append(&self, topic: &str, message: Message) -> Result<Delivery, BrokerError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Transient("broker transport failure".to_owned()));
        }
        self.inner.append(topic, message).await
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topic: &str,
        mode: CommitMode,
    ) -> Result<MemoryConsumer, BrokerError> {
        self.inner.subscribe(group_id, topic, mode).await
    }
}

/// 처음 `failures`번 insert에 실패하는 저장소
struct FlakyStore {
    inner: MemoryAlertStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryAlertStore::new(),
            failures: AtomicU32::new(failures),
        }
    }
}

impl AlertStore for FlakyStore {
    async fn insert(&self, message: &str) -> Result<AlertRecord, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Connection("connection reset".to_owned()));
        }
        self.inner.insert(message).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
        self.inner.recent(limit).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn alert_line_reaches_recent_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let broker = Arc::new(MemoryBroker::new(3));
    let store = Arc::new(MemoryAlertStore::new());

    let mut ingest = IngestPipelineBuilder::new(Arc::clone(&broker))
        .tail(tail_settings(&path))
        .build()
        .unwrap();
    let mut detection = DetectionPipelineBuilder::new(Arc::clone(&broker), Arc::clone(&store))
        .build()
        .unwrap();
    detection.start().await.unwrap();
    ingest.start().await.unwrap();

    append(&path, "ALERT: Failed login attempt from IP 192.168.1.17 at 10:00:00");

    wait_for(|| !store.is_empty()).await;
    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(
        recent[0].message,
        "ALERT: Failed login attempt from IP 192.168.1.17 at 10:00:00"
    );

    ingest.stop().await.unwrap();
    detection.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn info_line_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let broker = Arc::new(MemoryBroker::new(3));
    let store = Arc::new(MemoryAlertStore::new());

    let mut ingest = IngestPipelineBuilder::new(Arc::clone(&broker))
        .tail(tail_settings(&path))
        .build()
        .unwrap();
    let mut detection = DetectionPipelineBuilder::new(Arc::clone(&broker), Arc::clone(&store))
        .build()
        .unwrap();
    detection.start().await.unwrap();
    ingest.start().await.unwrap();

    append(&path, "INFO: User action detected at 10:00:00");

    let stats = detection.stats();
    wait_for(|| stats.consumed() == 1).await;
    assert_eq!(stats.threats(), 0);
    assert!(store.is_empty());
    assert_eq!(ingest.published_count(), 1);

    ingest.stop().await.unwrap();
    detection.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn recreated_file_is_read_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let broker = Arc::new(MemoryBroker::new(1));
    let store = Arc::new(MemoryAlertStore::new());

    let mut ingest = IngestPipelineBuilder::new(Arc::clone(&broker))
        .tail(tail_settings(&path))
        .build()
        .unwrap();
    let mut detection = DetectionPipelineBuilder::new(Arc::clone(&broker), Arc::clone(&store))
        .build()
        .unwrap();
    detection.start().await.unwrap();
    ingest.start().await.unwrap();

    append(&path, "ALERT: first line before the file is replaced");
    wait_for(|| store.len() == 1).await;

    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&path, "ALERT: second");
    wait_for(|| store.len() == 2).await;

    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent[0].message, "ALERT: second");

    ingest.stop().await.unwrap();
    detection.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_publish_failures_deliver_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let broker = Arc::new(FlakyBroker {
        inner: MemoryBroker::new(1),
        failures: AtomicU32::new(2),
    });

    let mut ingest = IngestPipelineBuilder::new(Arc::clone(&broker))
        .tail(tail_settings(&path))
        .publisher(fast_retry())
        .build()
        .unwrap();
    ingest.start().await.unwrap();

    append(&path, "ALERT: retried");
    wait_for(|| ingest.published_count() == 1).await;

    assert_eq!(broker.inner.topic_len("logs"), 1);
    assert_eq!(ingest.failed_count(), 0);
    assert!(ingest.health_check().await.is_healthy());
    ingest.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_insert_is_not_redelivered_under_auto_commit() {
    let broker = Arc::new(MemoryBroker::new(1));
    let store = Arc::new(FlakyStore::new(1));
    let mut detection = DetectionPipelineBuilder::new(Arc::clone(&broker), Arc::clone(&store))
        .build()
        .unwrap();
    detection.start().await.unwrap();

    broker.append("logs", Message::new("Key-1", "ALERT: dropped")).await.unwrap();
    let stats = detection.stats();
    wait_for(|| stats.persist_failures() == 1).await;
    assert!(matches!(
        detection.health_check().await,
        HealthStatus::Degraded(_)
    ));

    // 재시작해도 이미 커밋된 메시지는 다시 오지 않는다
    detection.stop().await.unwrap();
    detection.start().await.unwrap();
    broker.append("logs", Message::new("Key-2", "ALERT: kept")).await.unwrap();
    wait_for(|| stats.persisted() == 1).await;

    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].message, "ALERT: kept");
    assert!(detection.health_check().await.is_healthy());
    detection.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_insert_is_redelivered_after_persist() {
    let broker = Arc::new(MemoryBroker::new(1));
    let store = Arc::new(FlakyStore::new(1));
    let settings = ConsumerSettings {
        commit_policy: CommitPolicy::AfterPersist,
        ..Default::default()
    };
    let mut detection = DetectionPipelineBuilder::new(Arc::clone(&broker), Arc::clone(&store))
        .settings(settings)
        .build()
        .unwrap();
    detection.start().await.unwrap();

    broker.append("logs", Message::new("Key-1", "ALERT: retry me")).await.unwrap();
    broker.append("logs", Message::new("Key-1", "INFO: heartbeat")).await.unwrap();
    let stats = detection.stats();
    wait_for(|| stats.consumed() == 2).await;
    assert_eq!(stats.persist_failures(), 1);

    // 뒤따른 비위협 메시지도 실패한 알림을 건너뛰어 커밋하지 않는다
    assert_eq!(broker.committed_offset("log-sentinel-group", "logs", 0), None);

    detection.stop().await.unwrap();
    detection.start().await.unwrap();
    wait_for(|| broker.committed_offset("log-sentinel-group", "logs", 0) == Some(2)).await;

    assert_eq!(stats.persisted(), 1);
    assert_eq!(stats.consumed(), 4);
    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].message, "ALERT: retry me");
    assert!(detection.health_check().await.is_healthy());
    detection.stop().await.unwrap();
}
