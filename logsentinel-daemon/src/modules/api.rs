//! Query API module initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_log_pipeline::AlertStore;

use super::ModuleHandle;
use crate::api::QueryApiServer;

/// Initialize the query API module.
///
/// Returns `None` if the API is disabled in configuration.
pub fn init<S: AlertStore>(config: &LogSentinelConfig, store: Arc<S>) -> Result<Option<ModuleHandle>> {
    if !config.api.enabled {
        tracing::info!("query API disabled in configuration");
        return Ok(None);
    }

    let listen_addr: SocketAddr = config
        .api
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api listen address '{}': {}", config.api.listen_addr, e))?;

    tracing::info!(
        listen_addr = %listen_addr,
        recent_limit = config.api.recent_limit,
        "initializing query API"
    );

    let server = QueryApiServer::new(store, listen_addr, config.api.recent_limit);
    Ok(Some(ModuleHandle::new("api", Box::new(server))))
}
