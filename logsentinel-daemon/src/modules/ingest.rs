//! Ingest module initialization.
//!
//! Converts `[tail]` and `[broker]` into pipeline settings, builds the
//! `IngestPipeline` over the shared broker client and wraps it in a
//! `ModuleHandle`.
//!
//! ```text
//! watched file --FileTailer--> Publisher --append--> broker topic
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_core::pipeline::PipelineFailure;
use logsentinel_log_pipeline::{Broker, IngestPipelineBuilder, PublisherSettings, TailSettings};

use super::ModuleHandle;

/// Initialize the ingest module.
///
/// A tail source that ends is reported on `failures`.
///
/// # Returns
///
/// * `Ok(Some(ModuleHandle))` - Pipeline initialized and ready to start
/// * `Ok(None)` - Module disabled in configuration
/// * `Err(_)` - Initialization failed
pub fn init<B: Broker>(
    config: &LogSentinelConfig,
    broker: Arc<B>,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Option<ModuleHandle>> {
    if !config.tail.enabled {
        tracing::info!("ingest disabled in configuration");
        return Ok(None);
    }

    tracing::info!(path = %config.tail.path, topic = %config.broker.topic, "initializing ingest");

    let tail = TailSettings::from_core(&config.tail)
        .map_err(|e| anyhow::anyhow!("invalid tail settings: {}", e))?;
    let publisher = PublisherSettings::from_core(&config.broker)
        .map_err(|e| anyhow::anyhow!("invalid publisher settings: {}", e))?;

    let pipeline = IngestPipelineBuilder::new(broker)
        .tail(tail)
        .publisher(publisher)
        .failure_sender(failures.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build ingest pipeline: {}", e))?;

    Ok(Some(ModuleHandle::new("ingest", Box::new(pipeline))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsentinel_log_pipeline::MemoryBroker;

    fn failures() -> mpsc::Sender<PipelineFailure> {
        mpsc::channel(1).0
    }

    #[test]
    fn disabled_tail_registers_nothing() {
        let mut config = LogSentinelConfig::default();
        config.tail.enabled = false;
        let handle = init(&config, Arc::new(MemoryBroker::default()), &failures()).unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn invalid_start_position_fails() {
        let mut config = LogSentinelConfig::default();
        config.tail.start_from = "middle".to_owned();
        assert!(init(&config, Arc::new(MemoryBroker::default()), &failures()).is_err());
    }

    #[test]
    fn enabled_tail_registers_ingest() {
        let handle = init(&LogSentinelConfig::default(), Arc::new(MemoryBroker::default()), &failures())
            .unwrap()
            .unwrap();
        assert_eq!(handle.name, "ingest");
    }
}
