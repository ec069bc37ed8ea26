//! Detection module initialization.
//!
//! ```text
//! broker topic --consumer group--> classify --ALERT--> AlertStore
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_core::pipeline::PipelineFailure;
use logsentinel_log_pipeline::{AlertStore, Broker, ConsumerSettings, DetectionPipelineBuilder};

use super::ModuleHandle;

/// Initialize the detection module.
///
/// Returns `None` if the consumer is disabled in configuration. A consumer
/// loop that ends on a broker error is reported on `failures`.
pub fn init<B: Broker, S: AlertStore>(
    config: &LogSentinelConfig,
    broker: Arc<B>,
    store: Arc<S>,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Option<ModuleHandle>> {
    if !config.consumer.enabled {
        tracing::info!("detection disabled in configuration");
        return Ok(None);
    }

    tracing::info!(
        group_id = %config.broker.group_id,
        commit_policy = %config.consumer.commit_policy,
        "initializing detection"
    );

    let settings = ConsumerSettings::from_core(&config.broker, &config.consumer)
        .map_err(|e| anyhow::anyhow!("invalid consumer settings: {}", e))?;

    let pipeline = DetectionPipelineBuilder::new(broker, store)
        .settings(settings)
        .failure_sender(failures.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build detection pipeline: {}", e))?;

    Ok(Some(ModuleHandle::new("detection", Box::new(pipeline))))
}
