//! 에러 타입 -- 프로세스 전체 에러 분류
//!
//! 크레이트 로컬 에러(`cidtrack_pipeline::error::TrackerError` 등)는 [`CidTrackError`]로
//! 변환되어 바이너리에서 `?`로 그대로 전파할 수 있습니다.

/// cidtrack 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum CidTrackError {
    /// 설정 관련 에러 (시작 시 치명적)
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 또는 실행 중 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CidTrackError {
    /// 파이프라인이 실행된 뒤에 발생한 에러이면 true
    /// (시작 실패와 구분)
    pub fn is_runtime_fatal(&self) -> bool {
        matches!(self, Self::Pipeline(PipelineError::WatcherFatal(_)))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 허용되지 않는 필드 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// CID 패턴 컴파일 실패 또는 존재하지 않는 캡처 그룹 참조
    #[error("invalid regex pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    /// 감시 디렉토리가 없거나 디렉토리가 아님
    #[error("log directory does not exist: {path}")]
    DirectoryMissing { path: String },
}

/// 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `start`를 두 번 호출함
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 파이프라인에 `stop` 호출
    #[error("pipeline not running")]
    NotRunning,

    /// 채널 상대편이 닫힘
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// 시작 실패 (watcher 연결 실패 등)
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// watcher 장애가 지속됨, 프로세스를 종료해야 함
    #[error("watcher failed permanently: {0}")]
    WatcherFatal(String),
}
