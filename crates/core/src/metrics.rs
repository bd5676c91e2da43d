//! 메트릭 이름 상수 및 설명 등록
//!
//! 카운터는 `metrics` 파사드로 기록됩니다. 임베딩 프로세스가 recorder를
//! 설치하지 않으면 아무것도 내보내지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `cidtrack_`
//! - 접미어: `_total` (counter), 없음 (gauge)

/// recognizer에 전달된 로그 라인 수 (counter)
pub const LINES_PROCESSED_TOTAL: &str = "cidtrack_lines_processed_total";

/// CID가 하나 이상 매칭된 라인 수 (counter)
pub const CIDS_EXTRACTED_TOTAL: &str = "cidtrack_cids_extracted_total";

/// `is_valid = true`로 내보낸 레코드 수 (counter)
pub const CIDS_VALID_TOTAL: &str = "cidtrack_cids_valid_total";

/// `is_valid = false`로 내보낸 레코드 수 (counter)
pub const CIDS_INVALID_TOTAL: &str = "cidtrack_cids_invalid_total";

/// 잘못된 UUID, 읽기 에러 등 라인 단위 실패 (counter)
pub const ERRORS_TOTAL: &str = "cidtrack_errors_total";

/// 현재 tail 중인 파일 수 (gauge)
pub const ACTIVE_TAILS: &str = "cidtrack_active_tails";

/// 종료 시 drain 기한 이후 버려진 라인 수 (counter)
pub const LINES_DROPPED_TOTAL: &str = "cidtrack_lines_dropped_total";

/// 모든 메트릭의 HELP 텍스트 등록
///
/// recorder 설치 후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        LINES_PROCESSED_TOTAL,
        "Total number of log lines passed through the CID recognizer"
    );
    describe_counter!(
        CIDS_EXTRACTED_TOTAL,
        "Total number of log lines containing at least one CID"
    );
    describe_counter!(
        CIDS_VALID_TOTAL,
        "Total number of CID records carrying a version-5 UUID"
    );
    describe_counter!(
        CIDS_INVALID_TOTAL,
        "Total number of CID records without a version-5 UUID"
    );
    describe_counter!(ERRORS_TOTAL, "Total number of per-line processing errors");
    describe_gauge!(ACTIVE_TAILS, "Number of files currently tailed");
    describe_counter!(
        LINES_DROPPED_TOTAL,
        "Total number of in-flight lines dropped at shutdown"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_convention() {
        for name in [
            LINES_PROCESSED_TOTAL,
            CIDS_EXTRACTED_TOTAL,
            CIDS_VALID_TOTAL,
            CIDS_INVALID_TOTAL,
            ERRORS_TOTAL,
            LINES_DROPPED_TOTAL,
        ] {
            assert!(name.starts_with("cidtrack_"));
            assert!(name.ends_with("_total"));
        }
        assert!(!ACTIVE_TAILS.ends_with("_total"));
    }

    #[test]
    fn describe_without_recorder_is_noop() {
        describe_all();
    }
}
