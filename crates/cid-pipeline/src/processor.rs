//! 라인 단위 처리: CID 인식 후 출력 레코드 생성

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use cidtrack_core::record::CidRecord;

use crate::collector::LogLine;
use crate::extractor::CidExtractor;
use crate::stats::{LineOutcome, TrackerStats};

/// [`LogLine`]을 [`CidRecord`]로 변환하고 카운터를 갱신합니다.
#[derive(Debug, Clone)]
pub struct LineProcessor {
    extractor: Arc<CidExtractor>,
    stats: Arc<TrackerStats>,
}

impl LineProcessor {
    pub fn new(extractor: Arc<CidExtractor>, stats: Arc<TrackerStats>) -> Self {
        Self { extractor, stats }
    }

    pub fn extractor(&self) -> &CidExtractor {
        &self.extractor
    }

    /// recognizer 순서대로 CID 하나당 레코드 하나. CID가 없는 라인은
    /// 아무것도 만들지 않지만 처리된 라인으로 집계됩니다.
    pub fn process(&self, line: &LogLine) -> Vec<CidRecord> {
        let matches = self.extractor.extract(line);
        let mut outcome = LineOutcome {
            processed: 1,
            extracted: u64::from(!matches.is_empty()),
            ..LineOutcome::default()
        };

        let records: Vec<CidRecord> = matches
            .into_iter()
            .map(|m| {
                if m.malformed_uuid {
                    outcome.errors += 1;
                }
                let is_valid = m.is_valid();
                if is_valid {
                    outcome.valid += 1;
                } else {
                    outcome.invalid += 1;
                }
                CidRecord {
                    uuid: m.first_v5().map(|u| u.value.clone()).unwrap_or_default(),
                    cid: m.cid,
                    timestamp: line.read_at,
                    source_path: line.source.clone(),
                    raw_log_line: line.text.clone(),
                    extracted_at: Utc::now(),
                    is_valid,
                }
            })
            .collect();

        if !records.is_empty() {
            debug!(
                file = %line.source.display(),
                offset = line.offset,
                count = records.len(),
                "extracted CIDs"
            );
        }

        self.stats.apply(outcome);
        records
    }
}
