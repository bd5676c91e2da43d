//! UUID 분류기
//!
//! 하이픈 포함 UUID 문자열을 파싱해 버전과 variant를 보고합니다.
//! 36자 하이픈 형식만 허용하며, `uuid::Uuid`가 받아들이는 simple, braced,
//! URN 형식은 거부합니다.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::{Uuid, Variant};

const INVALID_FORMAT: &str = "invalid UUID format";
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// RFC 4122 variant, 8번째 바이트의 상위 비트에서 디코딩
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UuidVariant {
    /// `0xxxxxxx`
    #[serde(rename = "NCS")]
    Ncs,
    /// `10xxxxxx`
    #[serde(rename = "RFC4122")]
    Rfc4122,
    /// `110xxxxx`
    Microsoft,
    /// `111xxxxx`
    Reserved,
}

impl UuidVariant {
    /// UUID의 8번째 바이트에서 디코딩
    pub fn from_byte(b: u8) -> Self {
        if b & 0x80 == 0 {
            Self::Ncs
        } else if b & 0xC0 == 0x80 {
            Self::Rfc4122
        } else if b & 0xE0 == 0xC0 {
            Self::Microsoft
        } else {
            Self::Reserved
        }
    }
}

impl From<Variant> for UuidVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::NCS => Self::Ncs,
            Variant::RFC4122 => Self::Rfc4122,
            Variant::Microsoft => Self::Microsoft,
            _ => Self::Reserved,
        }
    }
}

impl fmt::Display for UuidVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ncs => "NCS",
            Self::Rfc4122 => "RFC4122",
            Self::Microsoft => "Microsoft",
            Self::Reserved => "Reserved",
        };
        f.write_str(name)
    }
}

/// [`UuidClassifier::classify`]의 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// 0-15. 파싱에 실패하면 0
    pub version: u8,
    pub variant: Option<UuidVariant>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ValidationResult {
    fn malformed() -> Self {
        Self {
            valid: false,
            version: 0,
            variant: None,
            error: Some(INVALID_FORMAT.to_owned()),
        }
    }

    /// 유효하고, version 5이며 RFC 4122 variant
    pub fn is_u5(&self) -> bool {
        self.valid && self.version == 5 && self.variant == Some(UuidVariant::Rfc4122)
    }

    /// 강제 여부와 무관하게 구문 파싱에 성공했으면 true
    pub fn parsed(&self) -> bool {
        self.variant.is_some()
    }
}

/// UUID 문자열을 버전과 variant로 분류
#[derive(Debug, Clone, Copy)]
pub struct UuidClassifier {
    enforce_u5: bool,
}

impl UuidClassifier {
    /// `enforce_u5`가 켜지면 구문상 유효한 v5 외 UUID를 invalid로 표시합니다.
    pub fn new(enforce_u5: bool) -> Self {
        Self { enforce_u5 }
    }

    /// `s`를 파싱해 버전, variant, 유효성을 보고합니다.
    pub fn classify(&self, s: &str) -> ValidationResult {
        let Some(uuid) = parse_hyphenated(s) else {
            return ValidationResult::malformed();
        };

        let version = uuid.get_version_num() as u8;
        let variant = UuidVariant::from(uuid.get_variant());

        let mut result = ValidationResult {
            valid: true,
            version,
            variant: Some(variant),
            error: None,
        };

        if self.enforce_u5 && version != 5 {
            result.valid = false;
            result.error = Some(format!("expected UUID version 5, got version {version}"));
        }

        result
    }

    /// 강제 플래그와 무관하게 `classify(s).version == 5`
    pub fn is_version_5(&self, s: &str) -> bool {
        self.classify(s).version == 5
    }

    /// tracking CID로 사용 가능: 유효하고, 강제 시 v5
    pub fn is_valid_cid(&self, s: &str) -> bool {
        let result = self.classify(s);
        result.valid && (!self.enforce_u5 || result.is_u5())
    }
}

impl Default for UuidClassifier {
    fn default() -> Self {
        Self::new(true)
    }
}

/// 엄격한 36자 하이픈 형식 파싱
pub fn parse_hyphenated(s: &str) -> Option<Uuid> {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return None;
    }
    if HYPHEN_POSITIONS.iter().any(|&i| bytes[i] != b'-') {
        return None;
    }
    Uuid::try_parse(s).ok()
}

/// 소문자 하이픈 형식. 파싱되지 않으면 `None`
pub fn canonicalize(s: &str) -> Option<String> {
    parse_hyphenated(s).map(|u| u.hyphenated().to_string())
}
