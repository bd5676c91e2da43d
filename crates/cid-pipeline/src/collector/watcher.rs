//! `notify` 기반 재귀 디렉토리 watcher
//!
//! OS 수준 알림(inotify, FSEvents, ReadDirectoryChangesW)을 사용합니다.
//! notify 콜백은 백엔드 자체 스레드에서 실행되어 tokio 채널로 전달하고,
//! [`DirectoryWatcher::next`]가 원시 이벤트를 [`WatchEvent`]로 변환합니다.
//! rename은 이전 경로의 remove와 새 경로의 create로 보고됩니다.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::TrackerError;

/// 초당 에러 수가 이 값을 넘으면 해당 초가 에스컬레이션에 집계됨
pub const ERROR_RATE_THRESHOLD: u32 = 10;
/// watcher를 죽은 것으로 판정하기까지 연속으로 임계값을 넘은 초 수
pub const ERROR_RATE_WINDOW: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Write,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    fn new(kind: WatchEventKind, path: PathBuf) -> Self {
        Self { kind, path }
    }
}

pub struct DirectoryWatcher {
    root: PathBuf,
    // 백엔드 유지용
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// `root`에 대한 재귀 감시 시작
    pub fn attach(root: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let root = root.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| TrackerError::Watcher(format!("init: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| TrackerError::Watcher(format!("watch {}: {e}", root.display())))?;

        Ok(Self {
            root,
            _watcher: watcher,
            rx,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 다음 이벤트 묶음, 또는 그 대신 전달된 백엔드 에러.
    /// 백엔드가 사라지면 `None`
    pub async fn next(&mut self) -> Option<Result<Vec<WatchEvent>, TrackerError>> {
        let res = self.rx.recv().await?;
        Some(
            res.map(convert_event)
                .map_err(|e| TrackerError::Watcher(e.to_string())),
        )
    }
}

/// notify 이벤트를 0개 이상의 watch 이벤트로 변환
pub fn convert_event(event: Event) -> Vec<WatchEvent> {
    let mut paths = event.paths.into_iter();
    match event.kind {
        EventKind::Create(_) => paths.map(|p| WatchEvent::new(WatchEventKind::Create, p)).collect(),
        EventKind::Remove(_) => paths.map(|p| WatchEvent::new(WatchEventKind::Remove, p)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(|p| WatchEvent::new(WatchEventKind::Remove, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(|p| WatchEvent::new(WatchEventKind::Create, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(WatchEvent::new(WatchEventKind::Remove, from));
            }
            if let Some(to) = paths.next() {
                out.push(WatchEvent::new(WatchEventKind::Create, to));
            }
            out
        }
        // Any/Other rename modes: existence decides
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|p| {
                let kind = if p.exists() {
                    WatchEventKind::Create
                } else {
                    WatchEventKind::Remove
                };
                WatchEvent::new(kind, p)
            })
            .collect(),
        EventKind::Modify(_) => paths.map(|p| WatchEvent::new(WatchEventKind::Write, p)).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// 파일 이름 suffix 필터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixFilter {
    suffix: String,
}

impl SuffixFilter {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.suffix))
    }
}

/// 연속된 [`ERROR_RATE_WINDOW`]개의 1초 구간 각각에서 에러가
/// [`ERROR_RATE_THRESHOLD`]개를 넘으면 에스컬레이션합니다.
#[derive(Debug)]
pub struct ErrorRateTracker {
    origin: Instant,
    threshold: u32,
    window: u64,
    // (second index, count), ascending
    buckets: VecDeque<(u64, u32)>,
}

impl ErrorRateTracker {
    pub fn new() -> Self {
        Self::with_limits(ERROR_RATE_THRESHOLD, ERROR_RATE_WINDOW)
    }

    pub fn with_limits(threshold: u32, window: u64) -> Self {
        Self {
            origin: Instant::now(),
            threshold,
            window: window.max(1),
            buckets: VecDeque::new(),
        }
    }

    /// `now` 시점의 에러 하나를 기록합니다. watcher를 영구 장애로 봐야 하면
    /// true를 반환합니다.
    pub fn record(&mut self, now: Instant) -> bool {
        let second = now.saturating_duration_since(self.origin).as_secs();

        match self.buckets.back_mut() {
            Some((s, count)) if *s == second => *count += 1,
            _ => self.buckets.push_back((second, 1)),
        }

        let oldest = second.saturating_sub(self.window - 1);
        while self.buckets.front().is_some_and(|(s, _)| *s < oldest) {
            self.buckets.pop_front();
        }

        self.buckets.len() as u64 == self.window
            && self
                .buckets
                .iter()
                .enumerate()
                .all(|(i, (s, count))| *s == oldest + i as u64 && *count > self.threshold)
    }

    /// 로그와 에러 메시지용 에스컬레이션 조건 설명
    pub fn describe(&self) -> String {
        format!(
            "more than {} errors/s for {} consecutive seconds",
            self.threshold, self.window
        )
    }
}

impl Default for ErrorRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn converts_basic_kinds() {
        let created = convert_event(event(EventKind::Create(CreateKind::File), &["/d/a.log"]));
        assert_eq!(created, [WatchEvent::new(WatchEventKind::Create, "/d/a.log".into())]);

        let written = convert_event(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/d/a.log"],
        ));
        assert_eq!(written[0].kind, WatchEventKind::Write);

        let removed = convert_event(event(EventKind::Remove(RemoveKind::File), &["/d/a.log"]));
        assert_eq!(removed[0].kind, WatchEventKind::Remove);

        assert!(convert_event(event(EventKind::Any, &["/d/a.log"])).is_empty());
    }

    #[test]
    fn rename_both_is_remove_then_create() {
        let out = convert_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/a.log", "/d/a.log.1"],
        ));
        assert_eq!(
            out,
            [
                WatchEvent::new(WatchEventKind::Remove, "/d/a.log".into()),
                WatchEvent::new(WatchEventKind::Create, "/d/a.log.1".into()),
            ]
        );
    }

    #[test]
    fn rename_halves() {
        let from = convert_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/a.log"],
        ));
        assert_eq!(from[0].kind, WatchEventKind::Remove);
        let to = convert_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/d/b.log"],
        ));
        assert_eq!(to[0].kind, WatchEventKind::Create);
    }

    #[test]
    fn suffix_filter() {
        let filter = SuffixFilter::new(".log");
        assert!(filter.matches(Path::new("/d/x.log")));
        assert!(filter.matches(Path::new("/d/sub/y.log")));
        assert!(!filter.matches(Path::new("/d/x.log.1")));
        assert!(!filter.matches(Path::new("/d/x.txt")));
    }

    fn burst(tracker: &mut ErrorRateTracker, at: Instant, n: u32) -> bool {
        let mut escalated = false;
        for _ in 0..n {
            escalated = tracker.record(at);
        }
        escalated
    }

    #[test]
    fn escalates_after_five_bad_seconds() {
        let mut tracker = ErrorRateTracker::new();
        let t0 = tracker.origin;
        for s in 0..4 {
            assert!(!burst(&mut tracker, t0 + Duration::from_secs(s), 11));
        }
        assert!(!burst(&mut tracker, t0 + Duration::from_secs(4), 10));
        assert!(tracker.record(t0 + Duration::from_secs(4)));
    }

    #[test]
    fn gap_resets_escalation() {
        let mut tracker = ErrorRateTracker::new();
        let t0 = tracker.origin;
        for s in [0, 1, 2, 4, 5] {
            assert!(!burst(&mut tracker, t0 + Duration::from_secs(s), 20));
        }
    }

    #[test]
    fn exactly_threshold_is_not_enough() {
        let mut tracker = ErrorRateTracker::new();
        let t0 = tracker.origin;
        for s in 0..10 {
            assert!(!burst(&mut tracker, t0 + Duration::from_secs(s), 10));
        }
    }

    #[test]
    fn describe_mentions_limits() {
        let text = ErrorRateTracker::new().describe();
        assert!(text.contains("10"));
        assert!(text.contains("5 consecutive"));
    }

    #[tokio::test]
    async fn attach_reports_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::attach(dir.path()).unwrap();
        let path = dir.path().join("new.log");
        std::fs::write(&path, b"x\n").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let batch = tokio::time::timeout_at(deadline, watcher.next())
                .await
                .expect("no create event")
                .expect("watcher closed")
                .unwrap();
            if batch
                .iter()
                .any(|e| e.kind == WatchEventKind::Create && e.path.ends_with("new.log"))
            {
                break;
            }
        }
    }

    #[test]
    fn attach_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryWatcher::attach(dir.path().join("missing")).is_err());
    }
}
