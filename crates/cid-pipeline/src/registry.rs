//! 활성 tail reader 레지스트리 (절대 경로 기준)
//!
//! 모든 연산은 락을 O(1) 작업 동안만 잡습니다. 파일 I/O와 태스크 join은
//! 항목을 맵에서 꺼낸 뒤에 수행합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collector::tail::FileId;

use cidtrack_core::metrics as m;

/// 파일별 tail 상태. 파일 핸들은 reader 태스크가 소유
#[derive(Debug)]
pub struct TailState {
    path: PathBuf,
    offset: Arc<AtomicU64>,
    file_id: Option<FileId>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TailState {
    pub fn new(
        path: PathBuf,
        offset: Arc<AtomicU64>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            path,
            offset,
            file_id: None,
            cancel,
            task,
        }
    }

    /// reader가 열고 있는 파일을 기록
    pub fn with_file_id(mut self, id: Option<FileId>) -> Self {
        self.file_id = id;
        self
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// reader가 실행 중이고 취소되지 않음
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// reader를 취소하고 `timeout`까지 종료를 기다린 뒤, 끝나지 않으면
    /// abort합니다. 태스크가 끝나면 파일 핸들이 닫힙니다.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            warn!(path = %self.path.display(), "tail reader did not exit in time, aborting");
            abort.abort();
        }
    }
}

#[derive(Debug, Default)]
pub struct TailRegistry {
    tails: Mutex<HashMap<PathBuf, TailState>>,
}

impl TailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, TailState>> {
        self.tails.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_live(&self, path: &Path) -> bool {
        self.lock().get(path).is_some_and(TailState::is_live)
    }

    /// 경로가 없을 때만 삽입합니다. 거부된 상태는 호출자가 취소할 수
    /// 있도록 되돌려 줍니다.
    pub fn insert(&self, state: TailState) -> Result<(), TailState> {
        let len = {
            let mut tails = self.lock();
            if tails.contains_key(&state.path) {
                return Err(state);
            }
            tails.insert(state.path.clone(), state);
            tails.len()
        };
        metrics::gauge!(m::ACTIVE_TAILS).set(len as f64);
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Option<TailState> {
        let (state, len) = {
            let mut tails = self.lock();
            (tails.remove(path), tails.len())
        };
        metrics::gauge!(m::ACTIVE_TAILS).set(len as f64);
        state
    }

    /// 레지스트리의 모든 항목을 꺼냄
    pub fn drain(&self) -> Vec<TailState> {
        let states: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();
        metrics::gauge!(m::ACTIVE_TAILS).set(0.0);
        states
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// tail 중인 경로 (정렬됨)
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.lock().get(path).map(TailState::byte_offset)
    }

    /// `path`에서 읽고 있는 파일의 식별자
    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        self.lock().get(path).and_then(TailState::file_id)
    }
}
