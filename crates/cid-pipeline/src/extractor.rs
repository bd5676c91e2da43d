//! CID recognizer
//!
//! 활성화된 CID 패턴을 선언 순서대로 라인에 적용한 뒤, 캡처된 각 CID에서
//! version-5 UUID를 찾습니다.
//!
//! 여러 패턴에 매칭된 구간은 한 번만 보고합니다. `(시작 오프셋, 값)`으로
//! 중복을 제거하며 먼저 선언된 패턴이 우선합니다.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use cidtrack_core::config::{CidPatternConfig, U5_UUID_PATTERN, default_cid_patterns};

use crate::collector::LogLine;
use crate::error::TrackerError;
use crate::uuid::{UuidClassifier, UuidVariant, canonicalize};

/// 컴파일된 [`CidPatternConfig`]
#[derive(Debug, Clone)]
pub struct CidPattern {
    pub name: String,
    regex: Regex,
    group: usize,
}

impl CidPattern {
    pub fn compile(config: &CidPatternConfig) -> Result<Self, TrackerError> {
        Ok(Self {
            name: config.name.clone(),
            regex: config.compile()?,
            group: config.uuid_group,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// CID 안에서 찾은 version-5 UUID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidMatch {
    /// 소문자 하이픈 형식
    pub value: String,
    pub version: u8,
    pub variant: UuidVariant,
    pub extracted_at: DateTime<Utc>,
}

/// 라인 안의 CID 한 건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidMatch<'a> {
    pub cid: String,
    /// 매칭을 만든 패턴 이름
    pub pattern: &'a str,
    /// 라인 내 CID의 바이트 오프셋
    pub start: usize,
    pub log_line: &'a LogLine,
    pub uuids: Vec<UuidMatch>,
    pub extracted_at: DateTime<Utc>,
    /// UUID 형태(36자 hex/대시)이지만 파싱되지 않는 CID
    pub malformed_uuid: bool,
}

impl CidMatch<'_> {
    pub fn first_v5(&self) -> Option<&UuidMatch> {
        self.uuids.first()
    }

    /// version-5 RFC 4122 UUID가 하나 이상 있음
    pub fn is_valid(&self) -> bool {
        self.uuids
            .iter()
            .any(|u| u.version == 5 && u.variant == UuidVariant::Rfc4122)
    }
}

/// 패턴 기반 CID 추출기. 생성 후 불변
#[derive(Debug, Clone)]
pub struct CidExtractor {
    patterns: Vec<CidPattern>,
    uuid_regex: Regex,
    classifier: UuidClassifier,
}

impl CidExtractor {
    /// 패턴 설정으로 생성합니다. 비활성 항목은 건너뛰며 활성 패턴이
    /// 최소 하나 필요합니다.
    pub fn new(
        configs: &[CidPatternConfig],
        classifier: UuidClassifier,
    ) -> Result<Self, TrackerError> {
        let patterns = configs
            .iter()
            .filter(|c| c.enabled)
            .map(CidPattern::compile)
            .collect::<Result<Vec<_>, _>>()?;

        if patterns.is_empty() {
            return Err(cidtrack_core::ConfigError::InvalidValue {
                field: "cid_patterns".to_owned(),
                reason: "at least one enabled pattern is required".to_owned(),
            }
            .into());
        }

        Ok(Self {
            patterns,
            uuid_regex: Regex::new(U5_UUID_PATTERN)?,
            classifier,
        })
    }

    /// U5 강제가 켜진 내장 패턴
    pub fn with_defaults() -> Result<Self, TrackerError> {
        Self::new(&default_cid_patterns(), UuidClassifier::default())
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name.as_str())
    }

    pub fn classifier(&self) -> &UuidClassifier {
        &self.classifier
    }

    /// `line`의 모든 CID. 패턴 순서, 그 다음 위치 순서
    pub fn extract<'a>(&'a self, line: &'a LogLine) -> Vec<CidMatch<'a>> {
        let text = line.text.as_str();
        let mut seen: HashSet<(usize, &str)> = HashSet::new();
        let mut matches = Vec::new();

        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let Some(group) = caps.get(pattern.group) else {
                    continue;
                };

                let raw = group.as_str();
                let value = raw.trim();
                if value.is_empty() {
                    continue;
                }
                let start = group.start() + (raw.len() - raw.trim_start().len());

                if !seen.insert((start, value)) {
                    continue;
                }

                // UUID 자체인 CID는 정규 형식으로 보고
                let canonical = canonicalize(value);
                let malformed_uuid = looks_like_uuid(value) && canonical.is_none();
                if malformed_uuid {
                    debug!(pattern = %pattern.name, cid = value, "UUID-shaped CID does not parse");
                }

                matches.push(CidMatch {
                    cid: canonical.unwrap_or_else(|| value.to_owned()),
                    pattern: pattern.name.as_str(),
                    start,
                    log_line: line,
                    uuids: self.extract_uuids(value),
                    extracted_at: Utc::now(),
                    malformed_uuid,
                });
            }
        }

        matches
    }

    /// `cid` 안의 version-5 UUID, 왼쪽부터
    pub fn extract_uuids(&self, cid: &str) -> Vec<UuidMatch> {
        self.uuid_regex
            .find_iter(cid)
            .filter_map(|m| {
                let result = self.classifier.classify(m.as_str());
                let variant = result.variant?;
                if result.version != 5 {
                    return None;
                }
                Some(UuidMatch {
                    value: canonicalize(m.as_str())?,
                    version: result.version,
                    variant,
                    extracted_at: Utc::now(),
                })
            })
            .collect()
    }
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36 && s.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-')
}
