//! 설정 -- JSON 설정 파일 모델과 실행 기본값
//!
//! [`TrackerConfig`]는 선택적 설정 파일의 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 플래그 (최우선, 데몬에서 적용)
//! 2. 환경변수 (`CIDTRACK_LOG_LEVEL=debug` 형식)
//! 3. 설정 파일
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), cidtrack_core::error::CidTrackError> {
//! use cidtrack_core::config::TrackerConfig;
//!
//! let config = TrackerConfig::load("/etc/cidtrack/config.json").await?;
//! let config = TrackerConfig::parse(r#"{"log_level": "debug"}"#)?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CidTrackError, ConfigError};

/// LogLine 채널 기본 용량
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
/// 기본 flush 간격
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// 기본 tail 폴링 간격
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(100);
/// 기본 correlation TTL
pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(3600);

/// UUID v5 (RFC 4122 variant), 하이픈 포함 hex 형식
pub const U5_UUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-5[0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}";

const VALID_OUTPUT_FORMATS: [&str; 2] = ["json", "structured"];
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 설정 파일 최상위 모델
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// 감시할 디렉토리 목록
    pub log_sources: Vec<LogSource>,
    /// CID 패턴 (선언 순서대로 적용)
    pub cid_patterns: Vec<CidPatternConfig>,
    /// `json` or `structured`
    pub output_format: String,
    /// 영구 sink용으로 예약됨. 파싱만 하고 stdout sink는 사용하지 않음
    pub output_path: String,
    /// LogLine 채널 용량. 0 이하이면 기본값 사용
    pub buffer_size: i64,
    /// sink flush 간격
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,
    /// tail 폴링 간격
    #[serde(with = "duration_serde")]
    pub watch_interval: Duration,
    /// classifier에서 v5가 아닌 UUID를 거부
    pub enable_u5_only: bool,
    /// correlation 항목 보관 기간. 파싱과 검증만 하며 라인 간 연관은
    /// 하지 않음
    #[serde(with = "duration_serde")]
    pub correlation_ttl: Duration,
    /// trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            log_sources: vec![LogSource::default()],
            cid_patterns: default_cid_patterns(),
            output_format: "json".to_owned(),
            output_path: "/var/output/cid-tracker.json".to_owned(),
            buffer_size: DEFAULT_BUFFER_SIZE as i64,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            enable_u5_only: true,
            correlation_ttl: DEFAULT_CORRELATION_TTL,
            log_level: "info".to_owned(),
        }
    }
}

impl TrackerConfig {
    /// JSON 파일에서 로드한 뒤 환경변수 오버라이드와 검증을 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CidTrackError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 환경변수 오버라이드 없이 JSON 파일에서 로드합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CidTrackError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CidTrackError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CidTrackError::Io(e)
            }
        })?;
        let mut config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 문서를 파싱합니다. 없는 키는 기본값을 사용합니다.
    pub fn parse(json: &str) -> Result<Self, CidTrackError> {
        serde_json::from_str(json).map_err(|e| {
            CidTrackError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 값을 오버라이드합니다.
    ///
    /// 변수 이름은 `CIDTRACK_{FIELD}` 형식입니다.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.log_level, "CIDTRACK_LOG_LEVEL");
        override_string(&mut self.output_format, "CIDTRACK_OUTPUT_FORMAT");
        override_i64(&mut self.buffer_size, "CIDTRACK_BUFFER_SIZE");
        override_millis(&mut self.watch_interval, "CIDTRACK_WATCH_INTERVAL_MS");
        override_bool(&mut self.enable_u5_only, "CIDTRACK_ENABLE_U5_ONLY");
    }

    /// 값을 검증하고 모든 패턴을 컴파일해 봅니다.
    ///
    /// 0 이하의 `buffer_size`와 0인 기간 값은 거부하지 않고 기본값으로
    /// 되돌립니다.
    pub fn validate(&mut self) -> Result<(), CidTrackError> {
        if self.buffer_size <= 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE as i64;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.watch_interval.is_zero() {
            self.watch_interval = DEFAULT_WATCH_INTERVAL;
        }
        if self.correlation_ttl.is_zero() {
            self.correlation_ttl = DEFAULT_CORRELATION_TTL;
        }

        if !VALID_OUTPUT_FORMATS.contains(&self.output_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "output_format".to_owned(),
                reason: format!("must be one of: {}", VALID_OUTPUT_FORMATS.join(", ")),
            }
            .into());
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level".to_owned(),
                reason: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
            }
            .into());
        }

        for pattern in &self.cid_patterns {
            pattern.compile()?;
        }

        if !self.cid_patterns.iter().any(|p| p.enabled) {
            return Err(ConfigError::InvalidValue {
                field: "cid_patterns".to_owned(),
                reason: "at least one pattern must be enabled".to_owned(),
            }
            .into());
        }

        for source in &self.log_sources {
            if source.path.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "log_sources.path".to_owned(),
                    reason: format!("source '{}' has an empty path", source.name),
                }
                .into());
            }
        }

        Ok(())
    }

    /// `buffer_size`를 채널 용량으로 변환
    pub fn channel_capacity(&self) -> usize {
        usize::try_from(self.buffer_size)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// 첫 번째 활성 소스
    pub fn primary_source(&self) -> Option<&LogSource> {
        self.log_sources.iter().find(|s| s.active)
    }
}

/// 감시할 로그 파일 디렉토리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSource {
    pub path: String,
    pub name: String,
    /// 파일 이름 glob. `*<suffix>` 형태만 해석함
    pub patterns: Vec<String>,
    pub active: bool,
    pub description: String,
}

impl Default for LogSource {
    fn default() -> Self {
        Self {
            path: "/var/log/app".to_owned(),
            name: "application".to_owned(),
            patterns: vec!["*.log".to_owned()],
            active: true,
            description: "Main application logs".to_owned(),
        }
    }
}

impl LogSource {
    /// 첫 번째 `*<suffix>` 패턴에서 얻은 suffix 필터
    pub fn suffix(&self) -> Option<&str> {
        self.patterns
            .iter()
            .filter_map(|p| p.strip_prefix('*'))
            .find(|s| !s.is_empty() && !s.contains('*'))
    }
}

/// 설정 가능한 CID 패턴
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidPatternConfig {
    pub name: String,
    pub regex_string: String,
    /// CID 값을 담는 캡처 그룹
    #[serde(default = "default_uuid_group")]
    pub uuid_group: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_uuid_group() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

impl CidPatternConfig {
    pub fn new(name: impl Into<String>, regex_string: impl Into<String>, uuid_group: usize) -> Self {
        Self {
            name: name.into(),
            regex_string: regex_string.into(),
            uuid_group,
            enabled: true,
        }
    }

    /// 정규식을 컴파일하고 `uuid_group`이 존재하는지 확인합니다.
    pub fn compile(&self) -> Result<Regex, ConfigError> {
        let regex = Regex::new(&self.regex_string).map_err(|e| ConfigError::InvalidPattern {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        if self.uuid_group >= regex.captures_len() {
            return Err(ConfigError::InvalidPattern {
                name: self.name.clone(),
                reason: format!(
                    "capture group {} does not exist ({} groups)",
                    self.uuid_group,
                    regex.captures_len() - 1
                ),
            });
        }
        Ok(regex)
    }
}

/// 내장 패턴: `bracket_cid`, `standard_cid`, `json_cid`
pub fn default_cid_patterns() -> Vec<CidPatternConfig> {
    vec![
        CidPatternConfig::new("bracket_cid", r"CID\[(\S+)\]", 1),
        CidPatternConfig::new("standard_cid", r"CID\s*[=:]\s*([0-9a-fA-F-]{36})", 1),
        CidPatternConfig::new("json_cid", r#""cid"\s*:\s*"([0-9a-fA-F-]{36})""#, 1),
    ]
}

/// humantime 문자열 형식의 기간. 정수는 나노초로 읽음
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Nanos(n) => Ok(Duration::from_nanos(n)),
            Raw::Text(s) => humantime::parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_i64(target: &mut i64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<i64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse integer from env var, ignoring"
            ),
        }
    }
}

fn override_millis(target: &mut Duration, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(ms) => *target = Duration::from_millis(ms),
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse milliseconds from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_is_valid() {
        let mut config = TrackerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output_format, "json");
        assert_eq!(config.channel_capacity(), 1000);
        assert_eq!(config.watch_interval, Duration::from_millis(100));
        assert!(config.enable_u5_only);
    }

    #[test]
    fn default_patterns_compile_in_order() {
        let names: Vec<_> = default_cid_patterns()
            .into_iter()
            .map(|p| {
                p.compile().unwrap();
                p.name
            })
            .collect();
        assert_eq!(names, ["bracket_cid", "standard_cid", "json_cid"]);
    }

    #[test]
    fn parse_full_document_with_nanosecond_durations() {
        let json = r#"{
            "log_sources": [{"path": "/var/log/test", "name": "test",
                             "patterns": ["*.log"], "active": true, "description": "Test logs"}],
            "cid_patterns": [{"name": "test_pattern", "regex_string": "CID:([a-fA-F0-9-]+)",
                              "uuid_group": 1, "enabled": true}],
            "output_format": "structured",
            "output_path": "/var/output/test.json",
            "buffer_size": 500,
            "flush_interval": 10000000000,
            "watch_interval": 200000000,
            "enable_u5_only": false,
            "correlation_ttl": 7200000000000,
            "log_level": "debug"
        }"#;
        let mut config = TrackerConfig::parse(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_sources[0].path, "/var/log/test");
        assert_eq!(config.output_format, "structured");
        assert_eq!(config.channel_capacity(), 500);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.watch_interval, Duration::from_millis(200));
        assert_eq!(config.correlation_ttl, Duration::from_secs(7200));
        assert!(!config.enable_u5_only);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn parse_humantime_durations() {
        let config = TrackerConfig::parse(r#"{"watch_interval": "250ms", "flush_interval": "2s"}"#)
            .unwrap();
        assert_eq!(config.watch_interval, Duration::from_millis(250));
        assert_eq!(config.flush_interval, Duration::from_secs(2));
    }

    #[test]
    fn empty_document_takes_defaults() {
        let mut config = TrackerConfig::parse("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.cid_patterns.len(), 3);
    }

    #[test]
    fn non_positive_buffer_size_falls_back() {
        let mut config = TrackerConfig::parse(
            r#"{"buffer_size": -5, "flush_interval": 0, "correlation_ttl": 0}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(config.correlation_ttl, DEFAULT_CORRELATION_TTL);
    }

    #[test]
    fn invalid_regex_is_fatal() {
        let mut config = TrackerConfig::parse(
            r#"{"cid_patterns": [{"name": "broken", "regex_string": "CID:([", "uuid_group": 1, "enabled": true}]}"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            CidTrackError::Config(ConfigError::InvalidPattern { ref name, .. }) if name == "broken"
        ));
    }

    #[test]
    fn missing_capture_group_is_fatal() {
        let pattern = CidPatternConfig::new("no_group", r"CID\[\S+\]", 1);
        assert!(pattern.compile().is_err());
    }

    #[test]
    fn all_patterns_disabled_is_rejected() {
        let mut config = TrackerConfig::default();
        for p in &mut config.cid_patterns {
            p.enabled = false;
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cid_patterns"));
    }

    #[test]
    fn rejects_unknown_output_format() {
        let mut config = TrackerConfig {
            output_format: "xml".to_owned(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unparseable_document_is_parse_error() {
        let err = TrackerConfig::parse("{not json").unwrap_err();
        assert!(matches!(err, CidTrackError::Config(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn source_suffix_from_glob() {
        let source = LogSource::default();
        assert_eq!(source.suffix(), Some(".log"));

        let odd = LogSource {
            patterns: vec!["app-*".to_owned(), "*.txt".to_owned()],
            ..Default::default()
        };
        assert_eq!(odd.suffix(), Some(".txt"));
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        let mut config = TrackerConfig::default();
        // SAFETY: serialized test; no other thread touches the environment.
        unsafe {
            std::env::set_var("CIDTRACK_LOG_LEVEL", "debug");
            std::env::set_var("CIDTRACK_WATCH_INTERVAL_MS", "250");
            std::env::set_var("CIDTRACK_ENABLE_U5_ONLY", "false");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("CIDTRACK_LOG_LEVEL");
            std::env::remove_var("CIDTRACK_WATCH_INTERVAL_MS");
            std::env::remove_var("CIDTRACK_ENABLE_U5_ONLY");
        }
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.watch_interval, Duration::from_millis(250));
        assert!(!config.enable_u5_only);
    }

    #[test]
    #[serial]
    fn env_override_bad_value_keeps_original() {
        let mut config = TrackerConfig::default();
        // SAFETY: serialized test; no other thread touches the environment.
        unsafe { std::env::set_var("CIDTRACK_BUFFER_SIZE", "lots") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("CIDTRACK_BUFFER_SIZE") };
        assert_eq!(config.buffer_size, 1000);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = TrackerConfig::from_file("/nonexistent/path/config.json")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CidTrackError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn from_file_reads_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"output_format": "structured", "log_level": "warn"}"#).unwrap();
        let config = TrackerConfig::from_file(&path).await.unwrap();
        assert_eq!(config.output_format, "structured");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn serialize_roundtrip_keeps_durations() {
        let config = TrackerConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let parsed = TrackerConfig::parse(&text).unwrap();
        assert_eq!(parsed.watch_interval, config.watch_interval);
        assert_eq!(parsed.correlation_ttl, config.correlation_ttl);
        assert_eq!(parsed.cid_patterns, config.cid_patterns);
    }
}
