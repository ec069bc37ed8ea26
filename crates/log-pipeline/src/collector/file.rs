//! 파일 기반 로그 tail
//!
//! 로그 파일을 감시하며 새로운 라인이 추가되면 하나씩 돌려줍니다.
//! `tail -F`와 유사한 동작을 비동기 폴링 방식으로 구현합니다.
//!
//! # 회전 감지
//! - inode 변경 감지 (삭제 후 재생성, logrotate 등)
//! - 파일 크기 축소 감지 (truncation)
//! - 파일이 사라졌다가 다시 나타나면 처음부터 다시 열기
//!
//! 감지 직전까지 읽지 못한 라인은 유실될 수 있습니다.

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

use logsentinel_core::metrics as m;
use logsentinel_core::types::LogLine;

use crate::config::{StartPosition, TailSettings};
use crate::error::LogPipelineError;

/// 파일 식별자 (Unix에서는 device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity_of(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity_of(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

/// 감시 파일 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    /// 파일을 열어 읽는 중
    Open,
    /// 경로에 파일이 없음 (재생성 대기)
    Missing,
}

/// 단일 파일 tail
///
/// [`FileTailer::next_line`]을 반복 호출하면 끝나지 않는 라인 시퀀스가 됩니다.
/// 시퀀스는 경로에 영구적으로 접근할 수 없을 때만 [`LogPipelineError::Tail`]로 끝납니다.
pub struct FileTailer {
    settings: TailSettings,
    reader: Option<BufReader<File>>,
    identity: Option<FileIdentity>,
    /// 현재 파일에서 소비한 바이트 위치
    offset: u64,
    /// 아직 줄바꿈을 만나지 못한 바이트 (최대 `max_line_length + 1`)
    partial: Vec<u8>,
    /// 현재 라인에서 길이 제한으로 버린 바이트 수
    discarded: usize,
    state: WatchState,
    first_open: bool,
    lines_read: u64,
    reopen_count: u64,
}

impl FileTailer {
    /// 감시 파일을 엽니다.
    ///
    /// `create_if_missing`이면 빈 파일을 만든 뒤 엽니다. 그렇지 않고 파일이
    /// 없으면 생성될 때까지 기다립니다.
    pub async fn open(settings: TailSettings) -> Result<Self, LogPipelineError> {
        settings.validate()?;

        if settings.create_if_missing {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&settings.path)
                .await
                .map_err(|e| tail_error(&settings.path, &e))?;
        }

        let mut tailer = Self {
            settings,
            reader: None,
            identity: None,
            offset: 0,
            partial: Vec::new(),
            discarded: 0,
            state: WatchState::Missing,
            first_open: true,
            lines_read: 0,
            reopen_count: 0,
        };
        tailer.try_open().await?;
        Ok(tailer)
    }

    /// 다음 라인을 기다려 반환합니다.
    ///
    /// 줄바꿈(`\n`, `\r\n`)은 제거됩니다. `max_line_length`를 넘는 라인은 잘립니다.
    /// 취소 안전합니다. 읽다 만 라인은 내부 버퍼에 남아 다음 호출에서 이어집니다.
    pub async fn next_line(&mut self) -> Result<LogLine, LogPipelineError> {
        loop {
            if self.reader.is_none() && !self.try_open().await? {
                tokio::time::sleep(self.settings.poll_interval).await;
                continue;
            }

            if let Some(line) = self.read_available().await? {
                return Ok(line);
            }

            if self.check_rotation().await? {
                continue;
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// 지금까지 반환한 라인 수
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// 회전/truncation으로 다시 연 횟수
    pub fn reopen_count(&self) -> u64 {
        self.reopen_count
    }

    /// 현재 파일에서의 바이트 위치
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 감시 경로
    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// 파일 열기를 시도합니다. 파일이 아직 없으면 `Ok(false)`.
    async fn try_open(&mut self) -> Result<bool, LogPipelineError> {
        let mut file = match File::open(&self.settings.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.state != WatchState::Missing || self.first_open {
                    debug!(path = %self.settings.path.display(), "watched file not present, waiting");
                }
                self.state = WatchState::Missing;
                return Ok(false);
            }
            Err(e) => return Err(tail_error(&self.settings.path, &e)),
        };

        let meta = file
            .metadata()
            .await
            .map_err(|e| tail_error(&self.settings.path, &e))?;

        let start = if self.first_open && self.settings.start_from == StartPosition::End {
            meta.len()
        } else {
            0
        };
        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| tail_error(&self.settings.path, &e))?;
        }

        if !self.first_open {
            self.reopen_count += 1;
            metrics::counter!(m::TAIL_REOPENS_TOTAL).increment(1);
            info!(path = %self.settings.path.display(), "reopened watched file from the beginning");
        }

        self.reader = Some(BufReader::new(file));
        self.identity = identity_of(&meta);
        self.offset = start;
        self.partial.clear();
        self.discarded = 0;
        self.state = WatchState::Open;
        self.first_open = false;
        Ok(true)
    }

    /// 열린 파일에서 완성된 라인 하나를 읽습니다. EOF면 `None`.
    ///
    /// 버퍼에는 `max_line_length`(+`\r` 한 바이트)까지만 담고, 나머지는
    /// 줄바꿈을 만날 때까지 읽고 버립니다.
    async fn read_available(&mut self) -> Result<Option<LogLine>, LogPipelineError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let keep = self.settings.max_line_length + 1;

        loop {
            let buf = reader
                .fill_buf()
                .await
                .map_err(|e| tail_error(&self.settings.path, &e))?;
            if buf.is_empty() {
                return Ok(None);
            }

            let newline = buf.iter().position(|b| *b == b'\n');
            let chunk = &buf[..newline.unwrap_or(buf.len())];
            let room = keep.saturating_sub(self.partial.len());
            let kept = chunk.len().min(room);
            self.partial.extend_from_slice(&chunk[..kept]);
            self.discarded += chunk.len() - kept;

            let used = chunk.len() + usize::from(newline.is_some());
            reader.consume(used);
            self.offset += used as u64;
            if newline.is_some() {
                break;
            }
        }

        let mut raw = std::mem::take(&mut self.partial);
        let discarded = std::mem::take(&mut self.discarded);
        if discarded == 0 && raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let length = raw.len() + discarded;
        if length > self.settings.max_line_length {
            warn!(
                path = %self.settings.path.display(),
                length,
                max = self.settings.max_line_length,
                "line exceeds max length, truncating"
            );
            raw.truncate(self.settings.max_line_length);
        }

        self.lines_read += 1;
        metrics::counter!(m::LINES_TAILED_TOTAL).increment(1);
        Ok(Some(LogLine::new(raw)))
    }

    /// EOF에서 경로 상태를 확인하고, 회전/truncation이면 다시 엽니다.
    ///
    /// 다시 열었으면 `true`.
    async fn check_rotation(&mut self) -> Result<bool, LogPipelineError> {
        let meta = match tokio::fs::metadata(&self.settings.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.state == WatchState::Open {
                    info!(path = %self.settings.path.display(), "watched file removed, waiting for it to reappear");
                }
                self.state = WatchState::Missing;
                return Ok(false);
            }
            Err(e) => return Err(tail_error(&self.settings.path, &e)),
        };

        let replaced = match (self.identity, identity_of(&meta)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        let truncated = meta.len() < self.offset;
        let reappeared = self.state == WatchState::Missing;

        if replaced || truncated || reappeared {
            debug!(
                path = %self.settings.path.display(),
                replaced,
                truncated,
                reappeared,
                "rotation detected"
            );
            self.reader = None;
            return self.try_open().await;
        }

        Ok(false)
    }
}

fn tail_error(path: &Path, err: &std::io::Error) -> LogPipelineError {
    LogPipelineError::Tail {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn settings_for(path: &Path) -> TailSettings {
        TailSettings {
            path: path.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(data.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
    }

    async fn next(tailer: &mut FileTailer) -> String {
        tokio::time::timeout(Duration::from_secs(5), tailer.next_line())
            .await
            .expect("timed out waiting for line")
            .expect("tail error")
            .text()
            .into_owned()
    }

    #[tokio::test]
    async fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let _tailer = FileTailer::open(settings_for(&path)).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn reads_existing_lines_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first\nsecond\r\n").await;

        let mut tailer = FileTailer::open(settings_for(&path)).await.unwrap();
        assert_eq!(next(&mut tailer).await, "first");
        assert_eq!(next(&mut tailer).await, "second");
        assert_eq!(tailer.lines_read(), 2);
    }

    #[tokio::test]
    async fn start_from_end_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old line\n").await;

        let mut settings = settings_for(&path);
        settings.start_from = StartPosition::End;
        let mut tailer = FileTailer::open(settings).await.unwrap();

        append(&path, "new line\n").await;
        assert_eq!(next(&mut tailer).await, "new line");
    }

    #[tokio::test]
    async fn partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut tailer = FileTailer::open(settings_for(&path)).await.unwrap();

        append(&path, "ALERT: par").await;
        let pending = tokio::time::timeout(Duration::from_millis(100), tailer.next_line()).await;
        assert!(pending.is_err(), "incomplete line must not be emitted");

        append(&path, "tial\n").await;
        assert_eq!(next(&mut tailer).await, "ALERT: partial");
    }

    #[tokio::test]
    async fn truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a fairly long line before truncation\n").await;

        let mut tailer = FileTailer::open(settings_for(&path)).await.unwrap();
        assert_eq!(next(&mut tailer).await, "a fairly long line before truncation");

        tokio::fs::write(&path, "short\n").await.unwrap();
        assert_eq!(next(&mut tailer).await, "short");
        assert_eq!(tailer.reopen_count(), 1);
    }

    #[tokio::test]
    async fn delete_and_recreate_resumes_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "INFO: before rotation\n").await;

        let mut tailer = FileTailer::open(settings_for(&path)).await.unwrap();
        assert_eq!(next(&mut tailer).await, "INFO: before rotation");

        tokio::fs::remove_file(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        append(&path, "ALERT: after rotation\n").await;

        assert_eq!(next(&mut tailer).await, "ALERT: after rotation");
        assert!(tailer.reopen_count() >= 1);
    }

    #[tokio::test]
    async fn long_lines_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "0123456789abcdef\n").await;

        let mut settings = settings_for(&path);
        settings.max_line_length = 8;
        let mut tailer = FileTailer::open(settings).await.unwrap();
        assert_eq!(next(&mut tailer).await, "01234567");
    }

    #[tokio::test]
    async fn unterminated_data_stays_within_line_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        let mut settings = settings_for(&path);
        settings.max_line_length = 8;
        let mut tailer = FileTailer::open(settings).await.unwrap();

        append(&path, &"x".repeat(4 * 1024 * 1024)).await;
        assert!(tailer.read_available().await.unwrap().is_none());
        assert!(tailer.partial.len() <= 9, "buffered {} bytes", tailer.partial.len());
        assert_eq!(tailer.offset(), 4 * 1024 * 1024);

        append(&path, "yyyy\nALERT: next\n").await;
        assert_eq!(next(&mut tailer).await, "xxxxxxxx");
        assert_eq!(next(&mut tailer).await, "ALERT: next");
    }

    #[tokio::test]
    async fn waits_for_file_when_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let mut settings = settings_for(&path);
        settings.create_if_missing = false;
        let mut tailer = FileTailer::open(settings).await.unwrap();

        append(&path, "hello\n").await;
        assert_eq!(next(&mut tailer).await, "hello");
    }

    #[tokio::test]
    async fn inaccessible_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("plain-file");
        tokio::fs::write(&not_a_dir, "x").await.unwrap();

        let result = FileTailer::open(settings_for(&not_a_dir.join("app.log"))).await;
        assert!(matches!(result, Err(LogPipelineError::Tail { .. })));
    }
}
