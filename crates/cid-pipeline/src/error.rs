//! 파이프라인 에러 타입
//!
//! [`TrackerError`]는 tail/추출 파이프라인 내부의 모든 실패를 표현합니다.
//! 파일 단위 variant(`FileOpen`, `Read`)는 내부에서 처리되어 로그나 카운터로만
//! 남고, 프로세스 단위 variant(`Config`, `WatcherFatal`)는
//! `From<TrackerError> for CidTrackError`를 거쳐 바이너리까지 전달됩니다.

use std::path::PathBuf;

use cidtrack_core::error::{CidTrackError, ConfigError, PipelineError};

/// tail/추출 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// 잘못된 설정 (디렉토리 없음, 잘못된 패턴)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 일시적인 알림 서브시스템 장애
    #[error("watcher error: {0}")]
    Watcher(String),

    /// watcher 장애율이 에스컬레이션 임계값을 넘은 상태로 유지됨
    #[error("watcher failed permanently: {0}")]
    WatcherFatal(String),

    /// 파일 하나를 열 수 없음. 해당 경로는 건너뜀
    #[error("failed to open {}: {reason}", path.display())]
    FileOpen { path: PathBuf, reason: String },

    /// tail 중인 파일 읽기 실패
    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    /// 채널 상대편이 닫힘
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<TrackerError> for CidTrackError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Config(e) => CidTrackError::Config(e),
            TrackerError::WatcherFatal(reason) => {
                CidTrackError::Pipeline(PipelineError::WatcherFatal(reason))
            }
            TrackerError::ChannelClosed(reason) => {
                CidTrackError::Pipeline(PipelineError::ChannelClosed(reason))
            }
            TrackerError::Io(e) => CidTrackError::Io(e),
            other => CidTrackError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_open_display_has_path() {
        let err = TrackerError::FileOpen {
            path: PathBuf::from("/var/log/app/a.log"),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/log/app/a.log"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn watcher_fatal_maps_to_pipeline_fatal() {
        let err: CidTrackError = TrackerError::WatcherFatal("10/s for 5s".to_owned()).into();
        assert!(err.is_runtime_fatal());
    }

    #[test]
    fn config_error_stays_config() {
        let err: CidTrackError = TrackerError::Config(ConfigError::DirectoryMissing {
            path: "/missing".to_owned(),
        })
        .into();
        assert!(matches!(err, CidTrackError::Config(_)));
    }

    #[test]
    fn watcher_error_maps_to_init_failed() {
        let err: CidTrackError = TrackerError::Watcher("inotify limit".to_owned()).into();
        assert!(matches!(
            err,
            CidTrackError::Pipeline(PipelineError::InitFailed(_))
        ));
    }
}
