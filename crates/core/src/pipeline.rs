//! 파이프라인 생명주기 trait

use std::fmt;
use std::future::Future;

use crate::error::CidTrackError;

/// 실행 중인 컴포넌트의 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작 중이지만 확인이 필요함
    Degraded(String),
    /// 동작하지 않음
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 장기 실행 컴포넌트가 공유하는 시작/정지 생명주기
///
/// ```text
/// Initialized -> start() -> Running -> stop() -> Stopped
/// ```
pub trait Pipeline: Send {
    /// 백그라운드 태스크를 시작합니다. 이미 실행 중이면 실패합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), CidTrackError>> + Send;

    /// graceful 정지를 요청하고 백그라운드 태스크가 끝날 때까지 대기합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), CidTrackError>> + Send;

    /// 현재 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
