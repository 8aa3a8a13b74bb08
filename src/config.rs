//! Analyzer configuration.

use std::time::Duration;

use crate::error::AnalyzerError;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(1500);
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 8;
pub const DEFAULT_MAX_BUFFERED_PER_REQUEST: usize = 64;
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 2048;
/// Milliseconds on the event-timestamp clock.
pub const DEFAULT_RETENTION_WINDOW_MS: f64 = 30_000.0;

/// Buffering bounds for extra-info events still waiting for request context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorLimits {
    pub max_buffered_per_request: usize,
    pub max_pending_requests: usize,
    /// Maximum age, in event-timestamp milliseconds, of a pending request's
    /// oldest buffered event.
    pub retention_window_ms: f64,
}

impl Default for CollectorLimits {
    fn default() -> Self {
        Self {
            max_buffered_per_request: DEFAULT_MAX_BUFFERED_PER_REQUEST,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            retention_window_ms: DEFAULT_RETENTION_WINDOW_MS,
        }
    }
}

/// Knobs shared by every page in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Pages analyzed in parallel.
    pub concurrency: usize,
    /// Idle time after navigation settles before a page is finalized.
    pub quiescence: Duration,
    /// Hard ceiling on a single page session.
    pub page_timeout: Duration,
    /// URL-less frames nested deeper than this are reported as unknown.
    pub max_frame_depth: usize,
    pub collector: CollectorLimits,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            quiescence: DEFAULT_QUIESCENCE,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            max_frame_depth: DEFAULT_MAX_FRAME_DEPTH,
            collector: CollectorLimits::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if self.concurrency == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.page_timeout.is_zero() {
            return Err(AnalyzerError::InvalidConfig(
                "page timeout must be greater than zero".into(),
            ));
        }
        if self.collector.max_buffered_per_request == 0 || self.collector.max_pending_requests == 0
        {
            return Err(AnalyzerError::InvalidConfig(
                "collector buffers must hold at least one event".into(),
            ));
        }
        let window = self.collector.retention_window_ms;
        if window.is_nan() || window <= 0.0 {
            return Err(AnalyzerError::InvalidConfig(
                "retention window must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.quiescence, Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = AnalyzerConfig {
            concurrency: 0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalyzerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_nan_retention_rejected() {
        let mut config = AnalyzerConfig::default();
        config.collector.retention_window_ms = f64::NAN;
        assert!(config.validate().is_err());
    }
}
