//! 파이프라인 오케스트레이션 -- 디렉토리 감시, tail reader, CID 추출, 레코드 출력의
//! 전체 흐름을 관리합니다.
//!
//! [`CidPipeline`]은 core의 [`Pipeline`] trait을 구현하여 데몬에서
//! start/stop/health_check로 구동됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! DirectoryWatcher -> TailRegistry -> TailReader* -> mpsc<LogLine> -> LineProcessor -> mpsc<CidRecord>
//! ```
//!
//! # 종료 순서
//! 토큰을 취소하거나 [`Pipeline::stop`]을 호출하면 watcher가 멈추고,
//! processor는 이미 꺼낸 라인을 마저 처리한 뒤 LogLine 채널에 남은 것을
//! 버리고 출력 채널을 닫습니다. tail reader는 마지막에 drain 타임아웃
//! 안에서 join됩니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cidtrack_core::error::{CidTrackError, PipelineError};
use cidtrack_core::pipeline::{HealthStatus, Pipeline};
use cidtrack_core::record::CidRecord;

use crate::collector::tail::{FileId, StartPosition};
use crate::collector::{
    DirectoryWatcher, ErrorRateTracker, LogLine, SuffixFilter, TailReader, WatchEvent,
    WatchEventKind,
};
use crate::config::PipelineConfig;
use crate::error::TrackerError;
use crate::extractor::CidExtractor;
use crate::processor::LineProcessor;
use crate::registry::{TailRegistry, TailState};
use crate::stats::{StatsSnapshot, TrackerStats, spawn_reporter};
use crate::uuid::UuidClassifier;

/// health가 Degraded를 보고하는 LogLine 채널 점유율 기준
const DEGRADED_UTILIZATION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Initialized,
    Running,
    Stopped,
}

/// 시작 시 순회와 watcher 태스크가 공유
#[derive(Debug)]
struct TailContext {
    config: PipelineConfig,
    filter: SuffixFilter,
    registry: Arc<TailRegistry>,
    line_tx: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
    stats: Arc<TrackerStats>,
}

impl TailContext {
    /// `root` 아래의 매칭되는 파일을 모두 재귀적으로 등록하며, 현재 파일 끝에서
    /// 시작합니다. 심볼릭 링크는 따라가지 않습니다.
    async fn walk(&self, root: &Path) -> Result<usize, TrackerError> {
        let mut dirs = vec![root.to_path_buf()];
        let mut started = 0;

        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir.as_path() == root => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read directory, skipping");
                    self.stats.record_error();
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    dirs.push(path);
                } else if file_type.is_file()
                    && self.filter.matches(&path)
                    && self.start_tail(&path, StartPosition::End).await
                {
                    started += 1;
                }
            }
        }

        Ok(started)
    }

    /// `path`에 대한 reader를 열고 등록합니다. 이미 tail 중이거나 열 수
    /// 없으면 false를 반환합니다.
    async fn start_tail(&self, path: &Path, start: StartPosition) -> bool {
        if self.registry.is_live(path) {
            return false;
        }
        // reader가 복구 불가능한 에러로 끝남, 교체
        if let Some(dead) = self.registry.remove(path) {
            dead.shutdown(self.config.drain_timeout).await;
        }

        let token = self.cancel.child_token();
        let reader = match TailReader::open(path, start, self.line_tx.clone(), token.clone()).await
        {
            Ok(reader) => reader
                .poll_interval(self.config.poll_interval)
                .max_line_length(self.config.max_line_length)
                .stats(Arc::clone(&self.stats)),
            Err(e) => {
                warn!(error = %e, "skipping file");
                self.stats.record_error();
                return false;
            }
        };

        let offset = reader.offset_handle();
        let file_id = reader.file_id();
        let start_offset = offset.load(std::sync::atomic::Ordering::Acquire);
        let task_path = path.to_path_buf();
        let task = tokio::spawn(async move {
            if let Err(e) = reader.run().await {
                warn!(path = %task_path.display(), error = %e, "tail reader stopped");
            }
        });

        match self
            .registry
            .insert(TailState::new(path.to_path_buf(), offset, token, task).with_file_id(file_id))
        {
            Ok(()) => {
                info!(path = %path.display(), offset = start_offset, "tailing file");
                true
            }
            Err(duplicate) => {
                duplicate.shutdown(self.config.drain_timeout).await;
                false
            }
        }
    }

    async fn stop_tail(&self, path: &Path) {
        if let Some(state) = self.registry.remove(path) {
            info!(path = %path.display(), offset = state.byte_offset(), "stopped tailing file");
            state.shutdown(self.config.drain_timeout).await;
        }
    }

    /// 시작 이후에 생긴 파일은 첫 바이트부터 읽습니다.
    async fn handle(&self, event: WatchEvent) {
        if !self.filter.matches(&event.path) {
            return;
        }
        match event.kind {
            WatchEventKind::Create => {
                let Some(meta) = regular_file(&event.path).await else {
                    return;
                };
                if self.registry.is_live(&event.path) {
                    let current = FileId::of(&meta);
                    if current.is_none() || self.registry.file_id(&event.path) == current {
                        return;
                    }
                    // 경로가 이제 다른 파일을 가리킴
                    self.stop_tail(&event.path).await;
                }
                self.start_tail(&event.path, StartPosition::Beginning).await;
            }
            WatchEventKind::Write => {
                if self.registry.is_live(&event.path) {
                    return;
                }
                let Some(meta) = regular_file(&event.path).await else {
                    return;
                };
                // 읽기 에러로 끝난 reader는 같은 파일일 때에 한해
                // 멈춘 위치부터 이어서 읽음
                let current = FileId::of(&meta);
                let start = self
                    .registry
                    .offset(&event.path)
                    .filter(|_| current.is_some() && self.registry.file_id(&event.path) == current)
                    .map_or(StartPosition::Beginning, StartPosition::Offset);
                self.start_tail(&event.path, start).await;
            }
            WatchEventKind::Remove => self.stop_tail(&event.path).await,
        }
    }
}

/// `path`가 심볼릭 링크가 아닌 일반 파일이면 그 메타데이터
async fn regular_file(path: &Path) -> Option<std::fs::Metadata> {
    tokio::fs::symlink_metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
}

/// CID 추적 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use cidtrack_pipeline::{CidPipelineBuilder, PipelineConfigBuilder};
///
/// let config = PipelineConfigBuilder::new().log_dir("/var/log/app").build()?;
/// let (mut pipeline, record_rx) = CidPipelineBuilder::new().config(config).build()?;
/// pipeline.start().await?;
/// ```
pub struct CidPipeline {
    config: PipelineConfig,
    state: PipelineState,
    processor: LineProcessor,
    stats: Arc<TrackerStats>,
    registry: Arc<TailRegistry>,
    cancel: CancellationToken,
    line_tx: Option<mpsc::Sender<LogLine>>,
    line_rx: Option<mpsc::Receiver<LogLine>>,
    record_tx: Option<mpsc::Sender<CidRecord>>,
    /// 영구 장애 시 watcher 태스크가 설정
    fatal: Arc<Mutex<Option<String>>>,
    tasks: Vec<JoinHandle<()>>,
    root: Option<PathBuf>,
}

impl CidPipeline {
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 시작 후 정규화된 감시 루트
    pub fn root_dir(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn active_tails(&self) -> usize {
        self.registry.len()
    }

    pub fn tailed_paths(&self) -> Vec<PathBuf> {
        self.registry.paths()
    }

    pub fn tail_offset(&self, path: &Path) -> Option<u64> {
        self.registry.offset(path)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<TrackerStats> {
        Arc::clone(&self.stats)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 태스크 그래프 밖에서 라인 하나를 recognizer에 통과시킴
    pub fn process_line(&self, line: &LogLine) -> Vec<CidRecord> {
        self.processor.process(line)
    }

    /// LogLine 채널 점유율 (0.0 ~ 1.0)
    pub fn channel_utilization(&self) -> f64 {
        self.line_tx.as_ref().map_or(0.0, |tx| {
            let max = tx.max_capacity();
            if max == 0 {
                0.0
            } else {
                1.0 - tx.capacity() as f64 / max as f64
            }
        })
    }

    /// 파이프라인이 취소되면 완료됩니다. watcher 장애로 취소된 경우
    /// 치명적 실행 에러를 반환합니다.
    pub async fn wait(&self) -> Option<CidTrackError> {
        self.cancel.cancelled().await;
        self.fatal_error()
    }

    pub fn fatal_error(&self) -> Option<CidTrackError> {
        self.fatal_reason()
            .map(|reason| TrackerError::WatcherFatal(reason).into())
    }

    fn fatal_reason(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn start_inner(&mut self) -> Result<(), TrackerError> {
        self.config.check_log_dir()?;
        let root = tokio::fs::canonicalize(&self.config.log_dir).await?;

        let (Some(line_tx), Some(line_rx), Some(record_tx)) = (
            self.line_tx.clone(),
            self.line_rx.take(),
            self.record_tx.take(),
        ) else {
            return Err(TrackerError::ChannelClosed(
                "pipeline channels already consumed".to_owned(),
            ));
        };

        let ctx = Arc::new(TailContext {
            config: self.config.clone(),
            filter: SuffixFilter::new(self.config.suffix.clone()),
            registry: Arc::clone(&self.registry),
            line_tx,
            cancel: self.cancel.clone(),
            stats: Arc::clone(&self.stats),
        });

        let started = ctx.walk(&root).await?;
        info!(root = %root.display(), files = started, "startup scan complete");

        let watcher = match DirectoryWatcher::attach(&root) {
            Ok(w) => w,
            Err(e) => {
                for state in self.registry.drain() {
                    state.shutdown(self.config.drain_timeout).await;
                }
                return Err(e);
            }
        };

        self.tasks.push(tokio::spawn(watch_loop(
            watcher,
            Arc::clone(&ctx),
            Arc::clone(&self.fatal),
        )));
        self.tasks.push(tokio::spawn(process_loop(
            line_rx,
            self.processor.clone(),
            record_tx,
            self.cancel.clone(),
            Arc::clone(&self.stats),
        )));
        self.tasks.push(spawn_reporter(
            Arc::clone(&self.stats),
            self.config.report_interval,
            self.cancel.clone(),
        ));

        self.root = Some(root);
        Ok(())
    }
}

async fn watch_loop(
    mut watcher: DirectoryWatcher,
    ctx: Arc<TailContext>,
    fatal: Arc<Mutex<Option<String>>>,
) {
    let mut errors = ErrorRateTracker::new();

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            next = watcher.next() => next,
        };

        match next {
            Some(Ok(events)) => {
                for event in events {
                    ctx.handle(event).await;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "watcher error");
                ctx.stats.record_error();
                if errors.record(Instant::now()) {
                    let reason = errors.describe();
                    error!(reason = %reason, "watcher failed permanently");
                    *fatal.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
                    ctx.cancel.cancel();
                    break;
                }
            }
            None => {
                let reason = "notification backend closed".to_owned();
                error!(reason = %reason, "watcher failed permanently");
                *fatal.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
                ctx.cancel.cancel();
                break;
            }
        }
    }

    debug!(root = %watcher.root().display(), "watcher stopped");
}

async fn process_loop(
    mut line_rx: mpsc::Receiver<LogLine>,
    processor: LineProcessor,
    record_tx: mpsc::Sender<CidRecord>,
    cancel: CancellationToken,
    stats: Arc<TrackerStats>,
) {
    let mut sink_closed = false;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = line_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        for record in processor.process(&line) {
            if sink_closed {
                break;
            }
            // 종료 중 출력이 가득 차면 기다리지 않고 레코드를 버림
            let permit = tokio::select! {
                biased;
                permit = record_tx.reserve() => permit.ok(),
                _ = cancel.cancelled() => match record_tx.try_reserve() {
                    Ok(permit) => Some(permit),
                    Err(TrySendError::Full(())) => {
                        debug!(cid = %record.cid, "output full at shutdown, dropping record");
                        continue;
                    }
                    Err(TrySendError::Closed(())) => None,
                },
            };
            match permit {
                Some(permit) => permit.send(record),
                None => {
                    debug!("record receiver dropped, discarding further records");
                    sink_closed = true;
                }
            }
        }
    }

    line_rx.close();
    let mut dropped = 0u64;
    while line_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        info!(dropped, "discarded in-flight lines on shutdown");
    }
    stats.record_dropped(dropped);
    // record_tx가 여기서 drop되며 출력 채널이 닫힘
}

impl Pipeline for CidPipeline {
    async fn start(&mut self) -> Result<(), CidTrackError> {
        match self.state {
            PipelineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "a stopped pipeline cannot be restarted".to_owned(),
                )
                .into());
            }
            PipelineState::Initialized => {}
        }

        info!(dir = %self.config.log_dir.display(), suffix = %self.config.suffix, "starting cid pipeline");
        self.start_inner().await?;
        self.state = PipelineState::Running;
        info!(tails = self.registry.len(), "cid pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CidTrackError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping cid pipeline");
        self.cancel.cancel();
        self.line_tx = None;

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                warn!("background task did not finish before drain timeout, aborting");
                abort.abort();
            }
        }

        for state in self.registry.drain() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            state.shutdown(remaining).await;
        }

        let s = self.stats.snapshot();
        info!(
            processed = s.processed_lines,
            extracted = s.extracted_cids,
            valid = s.valid_cids,
            invalid = s.invalid_cids,
            errors = s.errors,
            dropped = self.stats.dropped(),
            "cid pipeline stopped"
        );
        self.state = PipelineState::Stopped;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if let Some(reason) = self.fatal_reason() {
                    return HealthStatus::Unhealthy(reason);
                }
                if self.cancel.is_cancelled() {
                    return HealthStatus::Unhealthy("cancelled".to_owned());
                }
                let utilization = self.channel_utilization();
                if utilization > DEGRADED_UTILIZATION {
                    HealthStatus::Degraded(format!(
                        "line channel utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// [`CidPipeline`]과 채널을 생성하는 빌더
pub struct CidPipelineBuilder {
    config: PipelineConfig,
    record_tx: Option<mpsc::Sender<CidRecord>>,
    cancel: Option<CancellationToken>,
}

impl CidPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            record_tx: None,
            cancel: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 새 채널 대신 기존 채널로 레코드를 전달
    pub fn record_sender(mut self, tx: mpsc::Sender<CidRecord>) -> Self {
        self.record_tx = Some(tx);
        self
    }

    /// 호출자와 취소 토큰 공유 (시그널 처리)
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// # 반환값
    /// - 파이프라인
    /// - 레코드 receiver. `record_sender`가 설정되었으면 `None`
    pub fn build(self) -> Result<(CidPipeline, Option<mpsc::Receiver<CidRecord>>), TrackerError> {
        self.config.validate()?;

        let classifier = UuidClassifier::new(self.config.enforce_u5);
        let extractor = Arc::new(CidExtractor::new(&self.config.patterns, classifier)?);
        let stats = Arc::new(TrackerStats::new());

        let (line_tx, line_rx) = mpsc::channel(self.config.buffer_size);
        let (record_tx, record_rx) = match self.record_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.config.output_capacity);
                (tx, Some(rx))
            }
        };

        let pipeline = CidPipeline {
            processor: LineProcessor::new(extractor, Arc::clone(&stats)),
            config: self.config,
            state: PipelineState::Initialized,
            stats,
            registry: Arc::new(TailRegistry::new()),
            cancel: self.cancel.unwrap_or_default(),
            line_tx: Some(line_tx),
            line_rx: Some(line_rx),
            record_tx: Some(record_tx),
            fatal: Arc::new(Mutex::new(None)),
            tasks: Vec::new(),
            root: None,
        };

        Ok((pipeline, record_rx))
    }
}

impl Default for CidPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfigBuilder;
    use std::time::Duration;

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfigBuilder::new()
            .log_dir(dir)
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn builder_creates_pipeline() {
        let (pipeline, rx) = CidPipelineBuilder::new().build().unwrap();
        assert_eq!(pipeline.state_name(), "initialized");
        assert!(rx.is_some());
        assert_eq!(pipeline.active_tails(), 0);
    }

    #[tokio::test]
    async fn builder_with_external_sender() {
        let (tx, _rx) = mpsc::channel(4);
        let (_pipeline, rx) = CidPipelineBuilder::new().record_sender(tx).build().unwrap();
        assert!(rx.is_none());
    }

    #[tokio::test]
    async fn builder_rejects_invalid_config() {
        let config = PipelineConfig {
            buffer_size: 0,
            ..PipelineConfig::default()
        };
        assert!(CidPipelineBuilder::new().config(config).build().is_err());
    }

    #[tokio::test]
    async fn health_before_start_is_unhealthy() {
        let (pipeline, _rx) = CidPipelineBuilder::new().build().unwrap();
        assert!(pipeline.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn stop_before_start_fails() {
        let (mut pipeline, _rx) = CidPipelineBuilder::new().build().unwrap();
        assert!(pipeline.stop().await.is_err());
    }

    #[tokio::test]
    async fn start_missing_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _rx) = CidPipelineBuilder::new()
            .config(config(&dir.path().join("missing")))
            .build()
            .unwrap();
        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, CidTrackError::Config(_)));
        assert_eq!(pipeline.state_name(), "initialized");
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "old\n").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "old\n").unwrap();

        let (mut pipeline, mut rx) = CidPipelineBuilder::new()
            .config(config(dir.path()))
            .build()
            .unwrap();
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "running");
        assert_eq!(pipeline.active_tails(), 1);
        assert!(pipeline.health_check().await.is_healthy());
        assert!(pipeline.start().await.is_err());

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert_eq!(pipeline.active_tails(), 0);
        assert!(pipeline.fatal_error().is_none());

        // output channel closed
        let rx = rx.as_mut().unwrap();
        assert!(rx.recv().await.is_none());
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn process_line_outside_tasks() {
        let (pipeline, _rx) = CidPipelineBuilder::new().build().unwrap();
        let line = LogLine::new(
            "/var/log/app/a.log",
            0,
            "CID[550e8400-e29b-51d4-a716-446655440000]",
        );
        let records = pipeline.process_line(&line);
        assert_eq!(records.len(), 1);
        assert!(records[0].is_valid);
        assert_eq!(pipeline.stats().processed_lines, 1);
    }

    #[tokio::test]
    async fn external_cancel_resolves_wait() {
        let token = CancellationToken::new();
        let (pipeline, _rx) = CidPipelineBuilder::new()
            .cancellation_token(token.clone())
            .build()
            .unwrap();
        token.cancel();
        assert!(pipeline.wait().await.is_none());
    }
}
