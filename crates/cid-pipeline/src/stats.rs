//! 파이프라인 카운터와 주기적 통계 리포터
//!
//! 카운터는 `metrics` 파사드로 미러링되는 atomic입니다. 라인 단위
//! [`LineOutcome`]은 write guard 아래에서 적용되므로
//! [`TrackerStats::snapshot`](read guard)은 절반만 반영된 라인을 보지
//! 않습니다.
//!
//! `extracted`는 CID가 하나 이상 있는 라인 수이고, `valid`와 `invalid`는
//! CID 하나당 레코드 수입니다. 따라서 모든 스냅샷은
//! `extracted <= processed`와 `valid + invalid = records >= extracted`를 만족합니다.

use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cidtrack_core::metrics as m;

/// 라인 하나가 만든 카운터 변화량
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineOutcome {
    pub processed: u64,
    pub extracted: u64,
    pub valid: u64,
    pub invalid: u64,
    pub errors: u64,
}

/// 카운터의 특정 시점 복사본
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processed_lines: u64,
    pub extracted_cids: u64,
    pub valid_cids: u64,
    pub invalid_cids: u64,
    pub errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} extracted={} valid={} invalid={} errors={}",
            self.processed_lines, self.extracted_cids, self.valid_cids, self.invalid_cids, self.errors
        )
    }
}

#[derive(Debug, Default)]
pub struct TrackerStats {
    processed: AtomicU64,
    extracted: AtomicU64,
    valid: AtomicU64,
    invalid: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    gate: RwLock<()>,
}

impl TrackerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 라인 하나의 변화량을 스냅샷에 대해 원자적으로 적용
    pub fn apply(&self, outcome: LineOutcome) {
        {
            let _guard = self.gate.write().unwrap_or_else(|e| e.into_inner());
            self.processed.fetch_add(outcome.processed, Ordering::Relaxed);
            self.extracted.fetch_add(outcome.extracted, Ordering::Relaxed);
            self.valid.fetch_add(outcome.valid, Ordering::Relaxed);
            self.invalid.fetch_add(outcome.invalid, Ordering::Relaxed);
            self.errors.fetch_add(outcome.errors, Ordering::Relaxed);
        }

        metrics::counter!(m::LINES_PROCESSED_TOTAL).increment(outcome.processed);
        metrics::counter!(m::CIDS_EXTRACTED_TOTAL).increment(outcome.extracted);
        metrics::counter!(m::CIDS_VALID_TOTAL).increment(outcome.valid);
        metrics::counter!(m::CIDS_INVALID_TOTAL).increment(outcome.invalid);
        metrics::counter!(m::ERRORS_TOTAL).increment(outcome.errors);
    }

    /// 라인 처리 밖의 에러 하나를 집계 (읽기, 열기, watcher)
    pub fn record_error(&self) {
        self.apply(LineOutcome {
            errors: 1,
            ..LineOutcome::default()
        });
    }

    /// 종료 중 버려진 라인. 스냅샷에는 포함되지 않음
    pub fn record_dropped(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.dropped.fetch_add(n, Ordering::Relaxed);
        metrics::counter!(m::LINES_DROPPED_TOTAL).increment(n);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let _guard = self.gate.read().unwrap_or_else(|e| e.into_inner());
        StatsSnapshot {
            processed_lines: self.processed.load(Ordering::Relaxed),
            extracted_cids: self.extracted.load(Ordering::Relaxed),
            valid_cids: self.valid.load(Ordering::Relaxed),
            invalid_cids: self.invalid.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// `cancel`이 발동할 때까지 `interval`마다 스냅샷을 로그로 남김
pub fn spawn_reporter(
    stats: std::sync::Arc<TrackerStats>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 첫 tick은 즉시 완료됨
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let s = stats.snapshot();
                    info!(
                        processed = s.processed_lines,
                        extracted = s.extracted_cids,
                        valid = s.valid_cids,
                        invalid = s.invalid_cids,
                        errors = s.errors,
                        "tracker stats"
                    );
                }
            }
        }
    })
}
