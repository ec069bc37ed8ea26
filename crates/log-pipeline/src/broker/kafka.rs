//! Kafka 브로커 클라이언트 (`kafka` feature)
//!
//! `rdkafka`의 `FutureProducer`로 append하고, 구독마다 `StreamConsumer`를 만듭니다.
//! 파티션 할당과 리밸런스는 Kafka 그룹 코디네이터가 담당합니다.

use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode as KafkaCommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use logsentinel_core::error::BrokerError;
use logsentinel_core::types::Message;

use super::{Broker, BrokerConsumer, CommitMode, ConsumedMessage, Delivery};

/// 재시도로 회복될 수 있는 librdkafka 에러 코드인지 판단합니다.
fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::NetworkException
    )
}

fn classify(err: &KafkaError) -> BrokerError {
    if matches!(err, KafkaError::Canceled) {
        return BrokerError::Closed;
    }
    match err.rdkafka_error_code() {
        Some(code) if is_transient_code(code) => BrokerError::Transient(err.to_string()),
        _ => BrokerError::Rejected(err.to_string()),
    }
}

/// Kafka 브로커 클라이언트
pub struct KafkaBroker {
    producer: FutureProducer,
    brokers: String,
    delivery_timeout: Duration,
}

impl KafkaBroker {
    /// 부트스트랩 서버에 연결하는 producer를 생성합니다.
    ///
    /// `delivery_timeout`은 librdkafka 내부 재시도를 포함한 한 메시지의 전달 제한 시간입니다.
    pub fn connect(brokers: &str, delivery_timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set(
                "message.timeout.ms",
                delivery_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| classify(&e))?;

        info!(brokers, "kafka producer created");
        Ok(Self {
            producer,
            brokers: brokers.to_owned(),
            delivery_timeout,
        })
    }
}

impl Broker for KafkaBroker {
    type Consumer = KafkaConsumer;

    async fn append(&self, topic: &str, message: Message) -> Result<Delivery, BrokerError> {
        let mut record = FutureRecord::to(topic)
            .key(&message.key[..])
            .payload(&message.value[..]);
        if let Some(partition) = message.partition {
            record = record.partition(partition);
        }

        match self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((e, _)) => Err(classify(&e)),
        }
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topic: &str,
        mode: CommitMode,
    ) -> Result<KafkaConsumer, BrokerError> {
        let auto_commit = mode == CommitMode::Auto;
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", auto_commit.to_string())
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| classify(&e))?;

        consumer.subscribe(&[topic]).map_err(|e| classify(&e))?;
        info!(group_id, topic, auto_commit, "kafka consumer subscribed");

        Ok(KafkaConsumer { consumer })
    }
}

/// Kafka 구독 핸들
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl BrokerConsumer for KafkaConsumer {
    async fn next(&mut self) -> Result<ConsumedMessage, BrokerError> {
        let msg = self.consumer.recv().await.map_err(|e| classify(&e))?;
        Ok(ConsumedMessage {
            topic: msg.topic().to_owned(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(Bytes::copy_from_slice).unwrap_or_default(),
            value: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        })
    }

    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| classify(&e))?;
        self.consumer
            .commit(&tpl, KafkaCommitMode::Async)
            .map_err(|e| classify(&e))?;
        debug!(
            partition = message.partition,
            offset = message.offset,
            "offset committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure);
        assert!(classify(&err).is_transient());
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert!(classify(&err).is_transient());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(matches!(classify(&err), BrokerError::Rejected(_)));
    }

    #[test]
    fn canceled_maps_to_closed() {
        assert_eq!(classify(&KafkaError::Canceled), BrokerError::Closed);
    }
}
