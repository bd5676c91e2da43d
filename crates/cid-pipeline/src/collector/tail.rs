//! 파일 하나에 대한 비동기 `tail -f` reader
//!
//! reader가 파일 핸들을 소유합니다. EOF에서는 폴링 간격만큼 대기한 뒤
//! 파일 크기를 확인하며, 크기가 현재 오프셋보다 작으면 truncate된 것으로
//! 보고 미완성 라인 버퍼를 버린 채 0번 바이트부터 다시 읽습니다.
//! rename에 의한 로테이션은 여기가 아니라 watcher(remove + create)에서
//! 처리합니다.
//!
//! LogLine 채널이 가득 차면 전송이 블록되며 backpressure 때문에 라인을
//! 버리지 않습니다. 취소는 라인 사이, 블록된 전송 중, 대기 중에
//! 확인합니다.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cidtrack_core::config::DEFAULT_WATCH_INTERVAL;

use super::LogLine;
use crate::config::DEFAULT_MAX_LINE_LENGTH;
use crate::error::TrackerError;
use crate::stats::TrackerStats;

const READ_CHUNK: usize = 8 * 1024;

/// 열린 파일의 device와 inode. 경로의 식별자가 reader의 것과 다르면
/// 파일이 교체된 것입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// 새 reader의 시작 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    /// 현재 파일 끝. 기존 내용은 건너뜀
    End,
    Offset(u64),
}

pub struct TailReader {
    path: PathBuf,
    file: File,
    file_id: Option<FileId>,
    position: u64,
    offset: Arc<AtomicU64>,
    poll_interval: Duration,
    max_line_length: usize,
    tx: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
    stats: Arc<TrackerStats>,
}

impl std::fmt::Debug for TailReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailReader")
            .field("path", &self.path)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl TailReader {
    /// `path`를 열고 `start`로 이동합니다.
    ///
    /// 여기서의 실패는 파일 단위입니다. 호출자가 로그를 남기고 경로를 건너뜁니다.
    pub async fn open(
        path: impl AsRef<Path>,
        start: StartPosition,
        tx: mpsc::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<Self, TrackerError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |e: std::io::Error| TrackerError::FileOpen {
            path: path.clone(),
            reason: e.to_string(),
        };

        let mut file = File::open(&path).await.map_err(open_err)?;
        let meta = file.metadata().await.map_err(open_err)?;
        let position = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => meta.len(),
            StartPosition::Offset(n) => n,
        };
        file.seek(SeekFrom::Start(position)).await.map_err(open_err)?;

        Ok(Self {
            path,
            file,
            file_id: FileId::of(&meta),
            position,
            offset: Arc::new(AtomicU64::new(position)),
            poll_interval: DEFAULT_WATCH_INTERVAL,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            tx,
            cancel,
            stats: Arc::new(TrackerStats::new()),
        })
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_line_length(mut self, len: usize) -> Self {
        self.max_line_length = len;
        self
    }

    pub fn stats(mut self, stats: Arc<TrackerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    /// 다음에 읽을 바이트 오프셋의 공유 뷰
    pub fn offset_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.offset)
    }

    /// 취소되거나, LogLine 채널이 닫히거나, 복구 불가능한 읽기 에러가 날
    /// 때까지 읽습니다.
    pub async fn run(mut self) -> Result<(), TrackerError> {
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut pending = BytesMut::with_capacity(READ_CHUNK);
        let mut pending_start = self.position;

        debug!(path = %self.path.display(), offset = self.position, "tail started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.file.metadata().await {
                Ok(meta) if meta.len() < self.position => {
                    info!(
                        path = %self.path.display(),
                        size = meta.len(),
                        offset = self.position,
                        "file truncated, restarting at 0"
                    );
                    self.file
                        .seek(SeekFrom::Start(0))
                        .await
                        .map_err(|e| self.read_error(e))?;
                    self.set_position(0);
                    pending.clear();
                    pending_start = 0;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "stat failed");
                    self.stats.record_error();
                }
            }

            loop {
                match self.file.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        self.set_position(self.position + n as u64);
                        pending.extend_from_slice(&chunk[..n]);
                        if !self.emit_lines(&mut pending, &mut pending_start).await {
                            debug!(path = %self.path.display(), "tail stopped");
                            return Ok(());
                        }
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(path = %self.path.display(), error = %e, "read failed, retrying");
                        self.stats.record_error();
                        break;
                    }
                    Err(e) => {
                        self.stats.record_error();
                        return Err(self.read_error(e));
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!(path = %self.path.display(), "tail stopped");
        Ok(())
    }

    /// `pending`의 완성된 라인을 모두 보냅니다. reader가 멈춰야 하면
    /// false를 반환합니다.
    async fn emit_lines(&self, pending: &mut BytesMut, pending_start: &mut u64) -> bool {
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw = pending.split_to(pos + 1);
            let start = *pending_start;
            *pending_start += raw.len() as u64;

            let mut content = &raw[..pos];
            if let Some(stripped) = content.strip_suffix(b"\r") {
                content = stripped;
            }

            let line = LogLine::new(&self.path, start, String::from_utf8_lossy(content));
            if !self.send(line).await {
                return false;
            }
            if self.cancel.is_cancelled() {
                return false;
            }
        }

        if pending.len() > self.max_line_length {
            warn!(
                path = %self.path.display(),
                len = pending.len(),
                "line exceeds max length, emitting without terminator"
            );
            let raw = pending.split();
            let start = *pending_start;
            *pending_start += raw.len() as u64;
            let line = LogLine::new(&self.path, start, String::from_utf8_lossy(&raw));
            return self.send(line).await;
        }

        true
    }

    async fn send(&self, line: LogLine) -> bool {
        tokio::select! {
            biased;
            res = self.tx.send(line) => res.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
        self.offset.store(position, Ordering::Release);
    }

    fn read_error(&self, e: std::io::Error) -> TrackerError {
        TrackerError::Read {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}
