//! Lifecycle wrappers around the pipelines a role runs.
//!
//! `init` functions in the submodules return `None` when the role or
//! config leaves a pipeline out, so the registry only ever holds
//! pipelines that are meant to run. Registration order is producers
//! first (generator, ingest) then consumers (detection, api).

pub mod api;
pub mod detection;
pub mod generator;
pub mod ingest;

use logsentinel_core::error::{PipelineError, SentinelError};
use logsentinel_core::pipeline::DynPipeline;

use crate::health::ModuleHealth;

/// A named pipeline owned by the registry.
pub struct ModuleHandle {
    /// Label used in logs, health reports and start errors.
    pub name: String,
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    pub fn new(name: impl Into<String>, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            pipeline,
        }
    }
}

/// Ordered set of the pipelines for one daemon role.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Starts pipelines in registration order and stops at the first
    /// failure. Pipelines started before it stay running until
    /// [`stop_all`](Self::stop_all).
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        for handle in &mut self.modules {
            tracing::info!(module = %handle.name, "starting module");
            handle
                .pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start module '{}': {}", handle.name, e))?;
            tracing::info!(module = %handle.name, "module started");
        }
        Ok(())
    }

    /// Stops pipelines in registration order so the tail stops feeding
    /// the broker before the consumer group leaves. Every pipeline is
    /// asked to stop even if an earlier one fails; a pipeline that never
    /// started is skipped quietly.
    pub async fn stop_all(&mut self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for handle in &mut self.modules {
            tracing::info!(module = %handle.name, "stopping module");
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped"),
                Err(SentinelError::Pipeline(PipelineError::NotRunning)) => {
                    tracing::debug!(module = %handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(module = %handle.name, error = %e, "failed to stop module");
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("errors stopping modules: {}", errors.join("; ")))
        }
    }

    /// One health row per registered pipeline.
    pub async fn health_statuses(&self) -> Vec<ModuleHealth> {
        let mut rows = Vec::with_capacity(self.modules.len());
        for handle in &self.modules {
            rows.push(ModuleHealth {
                name: handle.name.clone(),
                enabled: true,
                status: handle.pipeline.health_check().await,
            });
        }
        rows
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn count(&self) -> usize {
        self.modules.len()
    }
}
