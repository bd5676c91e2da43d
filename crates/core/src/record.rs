//! 출력 레코드 -- 파이프라인의 외부 계약
//!
//! 매칭된 CID 하나마다 [`CidRecord`] 하나를 내보냅니다. sink는 레코드
//! 스트림을 소비하며, JSON 필드 이름은 고정입니다.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// 로그 라인 하나에서 추출한 CID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidRecord {
    /// 패턴 구분자 사이의 텍스트 (예: `CID[...]`)
    pub cid: String,
    /// CID 안의 첫 번째 version-5 UUID, 없으면 빈 문자열
    #[serde(default)]
    pub uuid: String,
    /// 파일에서 라인을 읽은 시각
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    /// 원본 파일의 절대 경로
    #[serde(rename = "log_file")]
    pub source_path: PathBuf,
    /// 원본 라인
    #[serde(rename = "raw_message")]
    pub raw_log_line: String,
    /// 레코드 생성 시각
    #[serde(rename = "processed_at", with = "rfc3339_nanos")]
    pub extracted_at: DateTime<Utc>,
    /// CID 안에서 version-5 RFC 4122 UUID를 하나 이상 찾았으면 true
    pub is_valid: bool,
}

impl CidRecord {
    /// 원본 파일 이름 (structured 텍스트 포맷에서 사용)
    pub fn basename(&self) -> String {
        basename(&self.source_path)
    }

    /// `[RFC3339] CID:<cid> FILE:<basename>`
    pub fn to_structured_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] CID:{} FILE:{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.cid,
            self.basename(),
        )
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 나노초 정밀도 RFC 3339, 항상 `Z`
pub mod rfc3339_nanos {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> CidRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        CidRecord {
            cid: "550e8400-e29b-51d4-a716-446655440000".to_owned(),
            uuid: "550e8400-e29b-51d4-a716-446655440000".to_owned(),
            timestamp: ts + chrono::Duration::nanoseconds(123_456_789),
            source_path: PathBuf::from("/var/log/app/service.log"),
            raw_log_line: "INFO CID[550e8400-e29b-51d4-a716-446655440000] processing".to_owned(),
            extracted_at: ts,
            is_valid: true,
        }
    }

    #[test]
    fn json_uses_external_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "cid",
            "uuid",
            "timestamp",
            "log_file",
            "raw_message",
            "processed_at",
            "is_valid",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj.len(), 7);
        assert_eq!(json["log_file"], "/var/log/app/service.log");
        assert_eq!(json["timestamp"], "2024-01-01T12:00:00.123456789Z");
    }

    #[test]
    fn json_reparse_is_equal() {
        let record = sample();
        let text = serde_json::to_string(&record).unwrap();
        let back: CidRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn structured_line_uses_basename() {
        let line = sample().to_structured_line();
        assert_eq!(
            line,
            "[2024-01-01T12:00:00Z] CID:550e8400-e29b-51d4-a716-446655440000 FILE:service.log"
        );
    }

    #[test]
    fn missing_uuid_defaults_to_empty() {
        let json = r#"{"cid":"x","timestamp":"2024-01-01T00:00:00Z","log_file":"/a.log",
            "raw_message":"CID[x]","processed_at":"2024-01-01T00:00:00Z","is_valid":false}"#;
        let record: CidRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.uuid, "");
        assert!(!record.is_valid);
    }
}
