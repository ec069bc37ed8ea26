//! 인메모리 브로커
//!
//! 단일 프로세스 안에서 Kafka와 같은 계약을 흉내 내는 파티션된 append 로그입니다.
//!
//! - 파티션: 키의 FNV-1a 해시로 결정 (같은 키는 항상 같은 파티션)
//! - 소비자 그룹: 파티션별 커밋 오프셋을 관리하고, 정렬된 멤버 목록에
//!   라운드로빈으로 파티션을 나눠 줍니다
//! - 리밸런스: 구독(참여) 또는 핸들 drop(이탈) 시 할당을 다시 계산합니다
//!
//! - 보존: 토픽의 모든 그룹이 커밋한 레코드는 버리고, 파티션당 보존 개수를
//!   넘으면 가장 오래된 레코드부터 버립니다. 오프셋은 계속 증가합니다
//!
//! 수동 커밋 구독자는 커밋하지 않은 메시지를 리밸런스 후 다시 받게 됩니다.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, info};

use logsentinel_core::error::BrokerError;
use logsentinel_core::types::Message;

use super::{Broker, BrokerConsumer, CommitMode, ConsumedMessage, Delivery};

/// 기본 파티션 수
const DEFAULT_PARTITIONS: u32 = 3;

/// 파티션당 기본 보존 레코드 수
pub const DEFAULT_RETENTION: usize = 100_000;

/// 키로부터 파티션을 결정합니다 (FNV-1a 32bit).
pub(crate) fn partition_for_key(key: &[u8], partitions: u32) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash % partitions.max(1)) as i32
}

#[derive(Debug, Clone)]
struct Record {
    key: Bytes,
    value: Bytes,
}

#[derive(Debug, Default)]
struct PartitionLog {
    /// 남아 있는 가장 오래된 레코드의 오프셋
    base: i64,
    records: VecDeque<Record>,
}

impl PartitionLog {
    fn next_offset(&self) -> i64 {
        self.base + self.records.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&Record> {
        let index = usize::try_from(offset - self.base).ok()?;
        self.records.get(index)
    }

    /// `offset` 앞의 레코드를 버리고 버린 개수를 반환합니다.
    fn trim_before(&mut self, offset: i64) -> usize {
        let mut dropped = 0;
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
            dropped += 1;
        }
        dropped
    }
}

#[derive(Debug, Default)]
struct GroupState {
    members: BTreeSet<u64>,
    /// 파티션별 다음 읽기 위치
    committed: HashMap<i32, i64>,
    generation: u64,
}

impl GroupState {
    fn assignment(&self, member_id: u64, partitions: u32) -> Vec<i32> {
        let Some(index) = self.members.iter().position(|m| *m == member_id) else {
            return Vec::new();
        };
        let n = self.members.len() as u32;
        (0..partitions)
            .filter(|p| p % n == index as u32)
            .map(|p| p as i32)
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<PartitionLog>>,
    groups: HashMap<(String, String), GroupState>,
    next_member_id: u64,
    closed: bool,
}

impl State {
    fn topic_mut(&mut self, topic: &str, partitions: u32) -> &mut Vec<PartitionLog> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| (0..partitions).map(|_| PartitionLog::default()).collect())
    }

    /// 토픽을 구독한 모든 그룹이 커밋한 레코드를 버립니다.
    fn trim_committed(&mut self, topic: &str, partition: i32) {
        let floor = self
            .groups
            .iter()
            .filter(|((_, t), _)| t == topic)
            .map(|(_, group)| group.committed.get(&partition).copied().unwrap_or(0))
            .min();
        let (Some(floor), Some(log)) = (
            floor,
            self.topics
                .get_mut(topic)
                .and_then(|parts| parts.get_mut(partition as usize)),
        ) else {
            return;
        };

        let dropped = log.trim_before(floor);
        if dropped > 0 {
            debug!(topic, partition, dropped, base = log.base, "trimmed committed records");
        }
    }
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    partitions: u32,
    retention: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 인메모리 브로커
///
/// `Clone`은 같은 로그를 공유하는 핸들을 만듭니다.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// 토픽당 `partitions`개 파티션을 가진 브로커를 생성합니다.
    pub fn new(partitions: u32) -> Self {
        Self::with_retention(partitions, DEFAULT_RETENTION)
    }

    /// 파티션당 최대 `retention`개 레코드만 보존하는 브로커를 생성합니다.
    pub fn with_retention(partitions: u32, retention: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                partitions: partitions.max(1),
                retention: retention.max(1),
            }),
        }
    }

    /// 토픽당 파티션 수
    pub fn partitions(&self) -> u32 {
        self.shared.partitions
    }

    /// 브로커를 닫습니다. 대기 중이거나 이후의 모든 호출이 `BrokerError::Closed`로 실패합니다.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
        info!("memory broker closed");
    }

    /// 닫혔는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// 토픽에 보존 중인 전체 메시지 수
    pub fn topic_len(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|parts| parts.iter().map(|log| log.records.len()).sum())
            .unwrap_or(0)
    }

    /// 파티션에 남아 있는 가장 오래된 오프셋
    pub fn earliest_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .and_then(|parts| parts.get(partition as usize))
            .map(|log| log.base)
    }

    /// 그룹의 파티션 커밋 오프셋 (다음 읽기 위치)
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .groups
            .get(&(group_id.to_owned(), topic.to_owned()))
            .and_then(|g| g.committed.get(&partition).copied())
    }

    /// 그룹의 현재 멤버 수
    pub fn member_count(&self, group_id: &str, topic: &str) -> usize {
        self.shared
            .lock()
            .groups
            .get(&(group_id.to_owned(), topic.to_owned()))
            .map(|g| g.members.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl Broker for MemoryBroker {
    type Consumer = MemoryConsumer;

    async fn append(&self, topic: &str, message: Message) -> Result<Delivery, BrokerError> {
        let partitions = self.shared.partitions;
        let partition = match message.partition {
            Some(p) if p < 0 || p as u32 >= partitions => {
                return Err(BrokerError::Rejected(format!(
                    "partition {p} out of range 0..{partitions}"
                )));
            }
            Some(p) => p,
            None => partition_for_key(&message.key, partitions),
        };

        let retention = self.shared.retention;
        let offset = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            let log = &mut state.topic_mut(topic, partitions)[partition as usize];
            let offset = log.next_offset();
            log.records.push_back(Record {
                key: message.key,
                value: message.value,
            });
            if log.records.len() > retention {
                let keep_from = log.next_offset() - retention as i64;
                let dropped = log.trim_before(keep_from);
                debug!(topic, partition, dropped, "retention limit reached");
            }
            offset
        };

        self.shared.notify.notify_waiters();
        Ok(Delivery { partition, offset })
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topic: &str,
        mode: CommitMode,
    ) -> Result<MemoryConsumer, BrokerError> {
        let member_id = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.topic_mut(topic, self.shared.partitions);
            let member_id = state.next_member_id;
            state.next_member_id += 1;

            let group = state
                .groups
                .entry((group_id.to_owned(), topic.to_owned()))
                .or_default();
            group.members.insert(member_id);
            group.generation += 1;
            member_id
        };

        self.shared.notify.notify_waiters();
        info!(group_id, topic, member_id, "joined consumer group");

        Ok(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: group_id.to_owned(),
            topic: topic.to_owned(),
            member_id,
            mode,
            positions: HashMap::new(),
            generation: 0,
            cursor: 0,
        })
    }
}

/// 인메모리 브로커 구독 핸들
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    topic: String,
    member_id: u64,
    mode: CommitMode,
    /// 커밋 전 로컬 진행 위치
    positions: HashMap<i32, i64>,
    generation: u64,
    cursor: usize,
}

impl MemoryConsumer {
    /// 그룹 내 멤버 ID
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// 현재 할당된 파티션 목록
    pub fn assigned_partitions(&self) -> Vec<i32> {
        self.shared
            .lock()
            .groups
            .get(&self.group_key())
            .map(|g| g.assignment(self.member_id, self.shared.partitions))
            .unwrap_or_default()
    }

    fn group_key(&self) -> (String, String) {
        (self.group_id.clone(), self.topic.clone())
    }

    /// 할당된 파티션에서 읽을 수 있는 메시지 하나를 꺼냅니다.
    fn poll_once(&mut self) -> Result<Option<ConsumedMessage>, BrokerError> {
        let key = self.group_key();
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(BrokerError::Closed);
        }

        let Some(group) = state.groups.get_mut(&key) else {
            return Err(BrokerError::Closed);
        };
        if group.generation != self.generation {
            debug!(
                group_id = %self.group_id,
                member_id = self.member_id,
                generation = group.generation,
                "partition assignment changed"
            );
            self.generation = group.generation;
            self.positions.clear();
            self.cursor = 0;
        }

        let assigned = group.assignment(self.member_id, self.shared.partitions);
        let Some(logs) = state.topics.get(&self.topic) else {
            return Ok(None);
        };

        let mut found = None;
        for i in 0..assigned.len() {
            let partition = assigned[(self.cursor + i) % assigned.len()];
            let log = &logs[partition as usize];
            // 보존 범위 밖으로 밀려난 위치는 가장 오래된 레코드부터 읽는다
            let position = self
                .positions
                .get(&partition)
                .copied()
                .or_else(|| group.committed.get(&partition).copied())
                .unwrap_or(0)
                .max(log.base);

            let Some(record) = log.get(position) else {
                continue;
            };

            self.positions.insert(partition, position + 1);
            if self.mode == CommitMode::Auto {
                group.committed.insert(partition, position + 1);
            }
            self.cursor = (self.cursor + i + 1) % assigned.len();

            found = Some(ConsumedMessage {
                topic: self.topic.clone(),
                partition,
                offset: position,
                key: record.key.clone(),
                value: record.value.clone(),
            });
            break;
        }

        if self.mode == CommitMode::Auto {
            if let Some(message) = &found {
                state.trim_committed(&self.topic, message.partition);
            }
        }
        Ok(found)
    }
}

impl BrokerConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<ConsumedMessage, BrokerError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.poll_once()? {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        let key = self.group_key();
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let group = state.groups.get_mut(&key).ok_or(BrokerError::Closed)?;
        let next = message.offset + 1;
        let entry = group.committed.entry(message.partition).or_insert(0);
        if *entry < next {
            *entry = next;
        }
        state.trim_committed(&self.topic, message.partition);
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let key = self.group_key();
        {
            let mut state = self.shared.lock();
            if let Some(group) = state.groups.get_mut(&key) {
                group.members.remove(&self.member_id);
                group.generation += 1;
            }
        }
        self.shared.notify.notify_waiters();
        debug!(group_id = %self.group_id, member_id = self.member_id, "left consumer group");
    }
}
