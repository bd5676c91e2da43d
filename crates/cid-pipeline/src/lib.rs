//! cidtrack 파이프라인 -- 디렉토리 트리 아래의 모든 로그 파일을 tail하며
//! correlation ID를 추출합니다.
//!
//! # 모듈 구성
//! - [`collector`]: 재귀 디렉토리 watcher와 파일별 tail reader
//! - [`extractor`]: 패턴 기반 CID recognizer
//! - [`uuid`]: UUID 버전/variant 분류기
//! - [`processor`]: LogLine -> CidRecord 변환
//! - [`registry`]: 활성 tail 관리
//! - [`stats`]: 카운터와 주기적 리포터
//! - [`pipeline`]: 전체 오케스트레이션, core의 `Pipeline` trait 구현

pub mod collector;
pub mod config;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod stats;
pub mod uuid;

pub use collector::LogLine;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::TrackerError;
pub use extractor::{CidExtractor, CidMatch, UuidMatch};
pub use pipeline::{CidPipeline, CidPipelineBuilder};
pub use processor::LineProcessor;
pub use stats::{StatsSnapshot, TrackerStats};
pub use uuid::{UuidClassifier, UuidVariant, ValidationResult};
