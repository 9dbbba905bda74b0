//! Pipeline configuration, passed in explicitly at construction.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::claims::{Clock, SystemClock};

/// Settings shared by every operation of one [`crate::Pipeline`].
#[derive(Clone)]
pub struct PipelineConfig {
    /// Token lifetime used when the requested duration does not parse.
    pub default_duration: Duration,
    /// Clock skew tolerated when checking `exp` / `nbf`.
    pub leeway: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::hours(1),
            leeway: Duration::zero(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl PipelineConfig {
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("default_duration", &self.default_duration)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}
