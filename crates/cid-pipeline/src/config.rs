//! 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의
//! [`TrackerConfig`](cidtrack_core::config::TrackerConfig)에서 파생되며 파이프라인에
//! 필요한 실행 설정(폴링 간격, 채널 용량, drain 타임아웃)을 담습니다.
//!
//! # 사용 예시
//! ```ignore
//! use cidtrack_pipeline::config::PipelineConfigBuilder;
//!
//! let config = PipelineConfigBuilder::new()
//!     .log_dir("/var/log/app")
//!     .suffix(".log")
//!     .build()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cidtrack_core::config::{
    CidPatternConfig, DEFAULT_BUFFER_SIZE, DEFAULT_WATCH_INTERVAL, LogSource, TrackerConfig,
    default_cid_patterns, duration_serde,
};
use cidtrack_core::error::ConfigError;

use crate::error::TrackerError;

pub const DEFAULT_LOG_DIR: &str = "/var/log/app";
pub const DEFAULT_SUFFIX: &str = ".log";
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);
/// 종료 문자 없이 내보내기 전까지 버퍼링하는 최대 라인 길이
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 재귀적으로 감시할 루트 디렉토리
    pub log_dir: PathBuf,
    /// 이 suffix로 끝나는 파일만 tail
    pub suffix: String,
    /// EOF에서의 tail reader 폴링 간격
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// LogLine 채널 용량
    pub buffer_size: usize,
    /// CidRecord 채널 용량
    pub output_capacity: usize,
    #[serde(with = "duration_serde")]
    pub drain_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub report_interval: Duration,
    pub enforce_u5: bool,
    pub max_line_length: usize,
    pub patterns: Vec<CidPatternConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            suffix: DEFAULT_SUFFIX.to_owned(),
            poll_interval: DEFAULT_WATCH_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            output_capacity: DEFAULT_BUFFER_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            report_interval: DEFAULT_REPORT_INTERVAL,
            enforce_u5: true,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            patterns: default_cid_patterns(),
        }
    }
}

impl PipelineConfig {
    /// 파일 설정에서 파생합니다. 첫 번째 활성 소스가 디렉토리와
    /// suffix를 제공하고, 나머지 필드는 기본값을 사용합니다.
    pub fn from_core(core: &TrackerConfig) -> Self {
        match core.primary_source() {
            Some(source) => Self::for_source(core, source),
            None => Self::shared(core),
        }
    }

    /// 다중 소스 설정에서 감시 소스 하나에 대한 설정
    pub fn for_source(core: &TrackerConfig, source: &LogSource) -> Self {
        let mut config = Self {
            log_dir: PathBuf::from(&source.path),
            ..Self::shared(core)
        };
        if let Some(suffix) = source.suffix() {
            config.suffix = suffix.to_owned();
        }
        config
    }

    fn shared(core: &TrackerConfig) -> Self {
        Self {
            poll_interval: core.watch_interval,
            buffer_size: core.channel_capacity(),
            output_capacity: core.channel_capacity(),
            enforce_u5: core.enable_u5_only,
            patterns: core.cid_patterns.clone(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(invalid("log_dir", "must not be empty"));
        }
        if self.suffix.is_empty() {
            return Err(invalid("suffix", "must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be greater than 0"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be greater than 0"));
        }
        if self.output_capacity == 0 {
            return Err(invalid("output_capacity", "must be greater than 0"));
        }
        if self.drain_timeout.is_zero() {
            return Err(invalid("drain_timeout", "must be greater than 0"));
        }
        if self.report_interval.is_zero() {
            return Err(invalid("report_interval", "must be greater than 0"));
        }
        if self.max_line_length == 0 {
            return Err(invalid("max_line_length", "must be greater than 0"));
        }

        let mut enabled = 0;
        for pattern in &self.patterns {
            pattern.compile()?;
            if pattern.enabled {
                enabled += 1;
            }
        }
        if enabled == 0 {
            return Err(invalid("patterns", "at least one enabled pattern is required"));
        }

        Ok(())
    }

    /// `log_dir`이 존재하는 디렉토리가 아니면 에러
    pub fn check_log_dir(&self) -> Result<(), TrackerError> {
        if is_dir(&self.log_dir) {
            Ok(())
        } else {
            Err(ConfigError::DirectoryMissing {
                path: self.log_dir.display().to_string(),
            }
            .into())
        }
    }

}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_dir())
}

fn invalid(field: &str, reason: &str) -> TrackerError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 설정에서 시작
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.suffix = suffix.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.config.output_capacity = capacity;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval = interval;
        self
    }

    pub fn enforce_u5(mut self, enforce: bool) -> Self {
        self.config.enforce_u5 = enforce;
        self
    }

    pub fn max_line_length(mut self, len: usize) -> Self {
        self.config.max_line_length = len;
        self
    }

    pub fn patterns(mut self, patterns: Vec<CidPatternConfig>) -> Self {
        self.config.patterns = patterns;
        self
    }

    /// 검증 후 설정을 반환합니다. 디렉토리 존재 여부는 여기서가 아니라
    /// 시작 시점에 확인합니다.
    pub fn build(self) -> Result<PipelineConfig, TrackerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
