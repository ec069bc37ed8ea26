//! Module orchestration -- backend wiring and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logsentinel-daemon`.
//! It validates configuration, connects the broker and alert store backends,
//! registers the modules selected by the process [`Role`], manages
//! startup/shutdown ordering and runs the main loop.
//!
//! # Start/Stop Order (producers before consumers)
//!
//! 1. Generator (writes the watched file)
//! 2. Ingest (tail -> publish)
//! 3. Detection (consume -> classify -> persist)
//! 4. Query API (reads the alert store)
//!
//! # Backends
//!
//! Broker and store are chosen at runtime (`[broker] backend`,
//! `[storage] backend`). The pipelines are generic over both, so each
//! combination is monomorphized through `with_store` and `register_modules`.
//! The alert store is closed after every module has stopped.
//!
//! # Fatal pipeline exits
//!
//! When the tail source ends or the consumer loop loses the broker, the
//! pipeline reports a [`PipelineFailure`]. The main loop then stops all
//! modules and `run_until` returns an error so the process exits non-zero.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_core::metrics as m;
use logsentinel_core::pipeline::{BoxFuture, PipelineFailure};
use logsentinel_log_pipeline::{AlertStore, Broker, MemoryAlertStore, MemoryBroker, PgAlertStore};

use crate::cli::Role;
use crate::health::{self, DaemonHealth, aggregate_status};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};

/// Interval between aggregated health checks in the main loop.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Pipelines report at most one failure per run.
const FAILURE_CHANNEL_CAPACITY: usize = 8;

/// Deferred release of the shared alert store.
type StoreRelease = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

/// Modules wired for a role plus the release hook of their shared store.
struct Wiring {
    modules: ModuleRegistry,
    release: StoreRelease,
}

fn store_release<S: AlertStore>(store: Arc<S>) -> StoreRelease {
    Box::new(move || -> BoxFuture<'static, ()> { Box::pin(async move { store.close().await }) })
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogSentinelConfig,
    /// Process role.
    role: Role,
    /// Registry of all modules (ordered for start/stop).
    modules: ModuleRegistry,
    /// Fatal exits reported by the core pipelines.
    failures: mpsc::Receiver<PipelineFailure>,
    /// Closes the alert store once modules are stopped.
    release: Option<StoreRelease>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    pub async fn build(config_path: &Path, role: Role) -> Result<Self> {
        let config = LogSentinelConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config, role).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Connects backends and initializes every module the role runs.
    pub async fn build_from_config(config: LogSentinelConfig, role: Role) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let (failure_tx, failures) = mpsc::channel(FAILURE_CHANNEL_CAPACITY);
        let Wiring { modules, release } = build_modules(&config, role, &failure_tx).await?;
        tracing::info!(
            role = %role,
            modules = ?modules.names(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_MODULES_REGISTERED).set(modules.count() as f64);
        }

        Ok(Self {
            config,
            role,
            modules,
            failures,
            release: Some(release),
            start_time: Instant::now(),
        })
    }

    /// Start all modules and block until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = wait_for_shutdown_signal()?;
        self.run_until(shutdown).await
    }

    /// Start all modules and block until `shutdown` resolves or a core
    /// pipeline terminates.
    ///
    /// Writes the PID file first and removes it on every exit path. A
    /// pipeline failure is returned as an error after the orderly shutdown.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        tracing::info!(role = %self.role, "starting all modules");
        if let Err(e) = self.modules.start_all().await {
            tracing::warn!("startup failed, rolling back already-started modules");
            if let Err(stop_err) = self.modules.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            self.release_store().await;
            if !pid_file.is_empty() {
                remove_pid_file(Path::new(&pid_file));
            }
            return Err(e);
        }

        tracing::info!("entering main loop");
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut fatal = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(failure) = self.failures.recv() => {
                    tracing::error!(
                        pipeline = %failure.pipeline,
                        reason = %failure.reason,
                        "core pipeline terminated, shutting down"
                    );
                    fatal = Some(failure);
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.health().await;
                    health::log_health(&report);
                }
            }
        }

        tracing::info!("stopping all modules");
        let result = self.modules.stop_all().await;
        self.release_store().await;

        if !pid_file.is_empty() {
            remove_pid_file(Path::new(&pid_file));
        }

        tracing::info!(uptime_secs = self.start_time.elapsed().as_secs(), "daemon stopped");
        match fatal {
            Some(failure) => Err(anyhow::anyhow!("{}", failure)),
            None => result,
        }
    }

    async fn release_store(&mut self) {
        if let Some(release) = self.release.take() {
            release().await;
        }
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let modules = self.modules.health_statuses().await;

        let status = aggregate_status(&modules);
        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status,
            uptime_secs,
            modules,
        }
    }

    /// Registered module names in start order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.names()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogSentinelConfig {
        &self.config
    }
}

/// Connect the configured broker, then continue with the store.
async fn build_modules(
    config: &LogSentinelConfig,
    role: Role,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Wiring> {
    match config.broker.backend.as_str() {
        "memory" => {
            if role != Role::All && role.needs_broker() {
                tracing::warn!(
                    role = %role,
                    "in-memory broker is process-local; producer and consumer roles will not see each other"
                );
            }
            let broker = Arc::new(MemoryBroker::new(config.broker.partitions));
            with_store(config, role, broker, failures).await
        }
        "kafka" => with_kafka(config, role, failures).await,
        other => Err(anyhow::anyhow!("unknown broker backend '{}'", other)),
    }
}

#[cfg(feature = "kafka")]
async fn with_kafka(
    config: &LogSentinelConfig,
    role: Role,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Wiring> {
    let broker = logsentinel_log_pipeline::KafkaBroker::connect(
        &config.broker.brokers,
        Duration::from_millis(config.broker.publish_timeout_ms),
    )
    .map_err(|e| anyhow::anyhow!("failed to create kafka client: {}", e))?;
    tracing::info!(brokers = %config.broker.brokers, "kafka broker client created");
    with_store(config, role, Arc::new(broker), failures).await
}

#[cfg(not(feature = "kafka"))]
async fn with_kafka(
    _config: &LogSentinelConfig,
    _role: Role,
    _failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Wiring> {
    Err(anyhow::anyhow!(
        "broker backend 'kafka' requires logsentinel-daemon built with the `kafka` feature"
    ))
}

/// Connect the configured alert store, then register modules.
async fn with_store<B: Broker>(
    config: &LogSentinelConfig,
    role: Role,
    broker: Arc<B>,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Wiring> {
    match config.storage.backend.as_str() {
        "memory" => wire(config, role, broker, Arc::new(MemoryAlertStore::new()), failures),
        "postgres" if role.needs_store() => {
            let store = PgAlertStore::connect(
                &config.storage.postgres_url,
                config.storage.max_connections,
                Duration::from_secs(config.storage.connect_timeout_secs),
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect alert store: {}", e))?;
            store
                .migrate()
                .await
                .map_err(|e| anyhow::anyhow!("failed to create alerts table: {}", e))?;
            wire(config, role, broker, Arc::new(store), failures)
        }
        // producer role never touches the store
        "postgres" => wire(config, role, broker, Arc::new(MemoryAlertStore::new()), failures),
        other => Err(anyhow::anyhow!("unknown storage backend '{}'", other)),
    }
}

fn wire<B: Broker, S: AlertStore>(
    config: &LogSentinelConfig,
    role: Role,
    broker: Arc<B>,
    store: Arc<S>,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<Wiring> {
    let release = store_release(Arc::clone(&store));
    let modules = register_modules(config, role, broker, store, failures)?;
    Ok(Wiring { modules, release })
}

/// Register the modules the role runs, producers first.
fn register_modules<B: Broker, S: AlertStore>(
    config: &LogSentinelConfig,
    role: Role,
    broker: Arc<B>,
    store: Arc<S>,
    failures: &mpsc::Sender<PipelineFailure>,
) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();

    if role.runs_producer() {
        if let Some(handle) = modules::generator::init(config)? {
            registry.register(handle);
        }
        if let Some(handle) = modules::ingest::init(config, Arc::clone(&broker), failures)? {
            registry.register(handle);
        }
    }

    if role.runs_consumer() {
        if let Some(handle) = modules::detection::init(config, broker, Arc::clone(&store), failures)? {
            registry.register(handle);
        }
    }

    if role.runs_dashboard() {
        if let Some(handle) = modules::api::init(config, store)? {
            registry.register(handle);
        }
    }

    Ok(registry)
}

/// Install SIGTERM/SIGINT handlers and return a future that resolves on either.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
fn wait_for_shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(async move {
        let signal = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = signal, "shutdown signal received");
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create file (prevents TOCTOU races)
/// - Verifies the created file is a regular file
/// - Creates parent directory with restrictive permissions (0o700)
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    use logsentinel_core::error::StorageError;
    use logsentinel_core::types::AlertRecord;

    /// Memory store that records whether it was closed.
    #[derive(Default)]
    struct ClosingStore {
        inner: MemoryAlertStore,
        closed: AtomicBool,
    }

    impl AlertStore for ClosingStore {
        async fn insert(&self, message: &str) -> Result<AlertRecord, StorageError> {
            self.inner.insert(message).await
        }

        async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
            self.inner.recent(limit).await
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn orchestrator_over<S: AlertStore>(
        config: LogSentinelConfig,
        role: Role,
        broker: Arc<MemoryBroker>,
        store: Arc<S>,
    ) -> Orchestrator {
        let (failure_tx, failures) = mpsc::channel(FAILURE_CHANNEL_CAPACITY);
        let Wiring { modules, release } = wire(&config, role, broker, store, &failure_tx).unwrap();
        Orchestrator {
            config,
            role,
            modules,
            failures,
            release: Some(release),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn broker_loss_ends_run_with_error() {
        let broker = Arc::new(MemoryBroker::new(1));
        let store = Arc::new(ClosingStore::default());
        let mut orchestrator = orchestrator_over(
            LogSentinelConfig::default(),
            Role::Consumer,
            Arc::clone(&broker),
            Arc::clone(&store),
        );

        let closer = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run_until(std::future::pending()),
        )
        .await
        .expect("run_until must return once the consumer loop ends");

        let err = result.unwrap_err().to_string();
        assert!(err.contains("detection"), "got: {err}");
        assert!(store.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn store_is_closed_after_modules_stop() {
        let mut config = LogSentinelConfig::default();
        config.api.listen_addr = "127.0.0.1:0".to_owned();
        let store = Arc::new(ClosingStore::default());
        let mut orchestrator = orchestrator_over(
            config,
            Role::Dashboard,
            Arc::new(MemoryBroker::new(1)),
            Arc::clone(&store),
        );
        assert_eq!(orchestrator.module_names(), vec!["api"]);

        orchestrator.run_until(async {}).await.unwrap();
        assert!(store.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn write_pid_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("logsentinel.pid");

        write_pid_file(&pid_file).unwrap();

        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn write_pid_file_fails_if_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("logsentinel.pid");
        fs::write(&pid_file, "12345").unwrap();

        let err = write_pid_file(&pid_file).unwrap_err().to_string();
        assert!(err.contains("already exists"), "got: {err}");
        assert!(err.contains("12345"), "got: {err}");
    }

    #[test]
    fn remove_pid_file_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("missing.pid");
        remove_pid_file(&pid_file);
        assert!(!pid_file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("logsentinel.pid");
        write_pid_file(&pid_file).unwrap();

        let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
