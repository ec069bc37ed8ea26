//! Log generator module initialization.
//!
//! The generator appends fake lines to the same file the ingest module
//! tails. Disabled by default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_log_pipeline::{GeneratorPipeline, GeneratorSettings};

use super::ModuleHandle;

/// Initialize the generator module.
///
/// Returns `None` if the generator is disabled in configuration.
pub fn init(config: &LogSentinelConfig) -> Result<Option<ModuleHandle>> {
    if !config.generator.enabled {
        tracing::debug!("log generator disabled in configuration");
        return Ok(None);
    }

    let settings = GeneratorSettings {
        path: PathBuf::from(&config.tail.path),
        interval: Duration::from_millis(config.generator.interval_ms),
        threat_ratio: config.generator.threat_ratio,
        seed: config.generator.seed,
    };
    tracing::info!(
        path = %settings.path.display(),
        interval_ms = config.generator.interval_ms,
        threat_ratio = settings.threat_ratio,
        "initializing log generator"
    );

    let pipeline = GeneratorPipeline::new(settings)
        .map_err(|e| anyhow::anyhow!("failed to build log generator: {}", e))?;

    Ok(Some(ModuleHandle::new("generator", Box::new(pipeline))))
}
