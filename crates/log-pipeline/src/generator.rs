//! 가짜 로그 생성기
//!
//! 감시 파일에 주기적으로 한 줄씩 추가하는 독립 writer입니다. tail 쪽과는
//! 파일 시스템 외에 어떤 동기화도 하지 않습니다.
//!
//! 생성되는 라인:
//! - `ALERT: Failed login attempt from IP 192.168.1.{0..254} at HH:MM:SS`
//! - `INFO: User action detected at HH:MM:SS`
//!
//! 난수원은 주입됩니다. 시드를 주면 출력이 결정적입니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logsentinel_core::error::{PipelineError, SentinelError};
use logsentinel_core::pipeline::{HealthStatus, Pipeline};

use crate::error::LogPipelineError;

/// 시드가 있으면 결정적 난수원을, 없으면 엔트로피 기반 난수원을 만듭니다.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// 라인 생성기
pub struct LogGenerator<R: Rng> {
    rng: R,
    threat_ratio: f64,
}

impl<R: Rng> LogGenerator<R> {
    /// 위협 라인 비율(0.0-1.0)로 생성기를 만듭니다.
    pub fn new(rng: R, threat_ratio: f64) -> Result<Self, LogPipelineError> {
        if !(0.0..=1.0).contains(&threat_ratio) {
            return Err(LogPipelineError::Config {
                field: "threat_ratio".to_owned(),
                reason: format!("{threat_ratio} is outside 0.0-1.0"),
            });
        }
        Ok(Self { rng, threat_ratio })
    }

    /// 주어진 시각으로 다음 라인을 만듭니다.
    pub fn next_line(&mut self, at: NaiveTime) -> String {
        let clock = at.format("%H:%M:%S");
        if self.rng.gen_bool(self.threat_ratio) {
            let octet: u8 = self.rng.gen_range(0..255);
            format!("ALERT: Failed login attempt from IP 192.168.1.{octet} at {clock}")
        } else {
            format!("INFO: User action detected at {clock}")
        }
    }
}

/// 생성기 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneratorState {
    Initialized,
    Running,
    Stopped,
}

/// 생성기 모듈 설정
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// 라인을 추가할 파일
    pub path: PathBuf,
    /// 추가 간격
    pub interval: Duration,
    /// 위협 라인 비율
    pub threat_ratio: f64,
    /// 난수 시드
    pub seed: Option<u64>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("app.log"),
            interval: Duration::from_secs(1),
            threat_ratio: 0.5,
            seed: None,
        }
    }
}

/// 감시 파일에 가짜 로그를 쓰는 백그라운드 모듈
pub struct GeneratorPipeline {
    settings: GeneratorSettings,
    state: GeneratorState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    lines_written: Arc<AtomicU64>,
}

impl GeneratorPipeline {
    /// 설정을 검증하고 모듈을 생성합니다.
    pub fn new(settings: GeneratorSettings) -> Result<Self, LogPipelineError> {
        if settings.interval.is_zero() {
            return Err(LogPipelineError::Config {
                field: "interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if !(0.0..=1.0).contains(&settings.threat_ratio) {
            return Err(LogPipelineError::Config {
                field: "threat_ratio".to_owned(),
                reason: format!("{} is outside 0.0-1.0", settings.threat_ratio),
            });
        }

        Ok(Self {
            settings,
            state: GeneratorState::Initialized,
            cancel: CancellationToken::new(),
            task: None,
            lines_written: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 지금까지 쓴 라인 수
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            GeneratorState::Initialized => "initialized",
            GeneratorState::Running => "running",
            GeneratorState::Stopped => "stopped",
        }
    }
}

async fn append_line(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

impl Pipeline for GeneratorPipeline {
    async fn start(&mut self) -> Result<(), SentinelError> {
        if self.state == GeneratorState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let mut generator = LogGenerator::new(
            seeded_rng(self.settings.seed),
            self.settings.threat_ratio,
        )?;
        let path = self.settings.path.clone();
        let period = self.settings.interval;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let written = Arc::clone(&self.lines_written);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let line = generator.next_line(Local::now().time());
                        match append_line(&path, &line).await {
                            Ok(()) => {
                                written.fetch_add(1, Ordering::Relaxed);
                                debug!(line = %line, "generated log line");
                            }
                            Err(e) => warn!(path = %path.display(), error = %e, "failed to write generated line"),
                        }
                    }
                }
            }
        }));
        self.cancel = cancel;
        self.state = GeneratorState::Running;
        info!(path = %self.settings.path.display(), "log generator started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SentinelError> {
        if self.state != GeneratorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "generator task ended abnormally");
            }
        }
        self.state = GeneratorState::Stopped;
        info!(lines = self.lines_written(), "log generator stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            GeneratorState::Running => HealthStatus::Healthy,
            GeneratorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            GeneratorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 34, 56).unwrap()
    }

    #[test]
    fn ratio_one_always_alerts() {
        let mut generator = LogGenerator::new(seeded_rng(Some(1)), 1.0).unwrap();
        for _ in 0..20 {
            let line = generator.next_line(noon());
            assert!(line.starts_with("ALERT: Failed login attempt from IP 192.168.1."));
            assert!(line.ends_with(" at 12:34:56"));
        }
    }

    #[test]
    fn ratio_zero_never_alerts() {
        let mut generator = LogGenerator::new(seeded_rng(Some(1)), 0.0).unwrap();
        for _ in 0..20 {
            assert_eq!(
                generator.next_line(noon()),
                "INFO: User action detected at 12:34:56"
            );
        }
    }

    #[test]
    fn same_seed_same_output() {
        let mut a = LogGenerator::new(seeded_rng(Some(42)), 0.5).unwrap();
        let mut b = LogGenerator::new(seeded_rng(Some(42)), 0.5).unwrap();
        for _ in 0..50 {
            assert_eq!(a.next_line(noon()), b.next_line(noon()));
        }
    }

    #[test]
    fn last_octet_stays_below_255() {
        let mut generator = LogGenerator::new(seeded_rng(Some(7)), 1.0).unwrap();
        for _ in 0..500 {
            let line = generator.next_line(noon());
            let octet: u32 = line
                .trim_start_matches("ALERT: Failed login attempt from IP 192.168.1.")
                .split(' ')
                .next()
                .unwrap()
                .parse()
                .unwrap();
            assert!(octet <= 254);
        }
    }

    #[test]
    fn invalid_ratio_is_rejected() {
        assert!(LogGenerator::new(seeded_rng(None), 1.5).is_err());
        let settings = GeneratorSettings {
            threat_ratio: -0.1,
            ..Default::default()
        };
        assert!(GeneratorPipeline::new(settings).is_err());
    }

    #[tokio::test]
    async fn module_appends_lines_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut module = GeneratorPipeline::new(GeneratorSettings {
            path: path.clone(),
            interval: Duration::from_millis(10),
            threat_ratio: 1.0,
            seed: Some(3),
        })
        .unwrap();

        module.start().await.unwrap();
        assert!(module.health_check().await.is_healthy());
        tokio::time::sleep(Duration::from_millis(80)).await;
        module.stop().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(module.lines_written() >= 1);
        assert_eq!(content.lines().count() as u64, module.lines_written());
        assert!(content.lines().all(|l| l.starts_with("ALERT: ")));
        assert!(module.stop().await.is_err());
    }
}
