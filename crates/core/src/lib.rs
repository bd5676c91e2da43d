//! cidtrack 코어 -- 파이프라인 크레이트와 데몬이 공유하는 타입, trait, 에러, 설정

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod record;

// --- 재노출 ---

pub use error::{CidTrackError, ConfigError, PipelineError};

pub use config::{CidPatternConfig, LogSource, TrackerConfig};

pub use pipeline::{HealthStatus, Pipeline};

pub use record::CidRecord;
