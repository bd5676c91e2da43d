//! 로그 수집: 디렉토리 감시와 파일별 tail
//!
//! # 수집 소스
//! - [`DirectoryWatcher`]: 로그 루트에 대한 재귀 `notify` 감시
//! - [`TailReader`]: `tail -f` 방식 reader, 파일마다 tokio 태스크 하나
//!
//! 모든 reader는 driver와 공유하는 bounded
//! `tokio::mpsc::Sender<LogLine>` 하나로 [`LogLine`]을 보냅니다.

pub mod tail;
pub mod watcher;

pub use tail::TailReader;
pub use watcher::{DirectoryWatcher, ErrorRateTracker, SuffixFilter, WatchEvent, WatchEventKind};

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// tail 중인 파일에서 읽은 개행 종료 라인 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 파일의 절대 경로
    pub source: PathBuf,
    /// 라인을 읽은 시각
    pub read_at: DateTime<Utc>,
    /// 라인 첫 바이트의 오프셋
    pub offset: u64,
    /// 종료 문자를 제외한 라인 내용
    pub text: String,
}

impl LogLine {
    pub fn new(source: impl Into<PathBuf>, offset: u64, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            read_at: Utc::now(),
            offset,
            text: text.into(),
        }
    }
}
