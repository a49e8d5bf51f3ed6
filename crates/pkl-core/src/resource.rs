//! Execution limits: the per-evaluation timeout and stack-depth guard.
//!
//! Grounded on the teacher's `ResourceTracker`/`ResourceLimits` pair: a trait the evaluation
//! engine polls at predictable points (entering a force, recursing into `super`, stepping a
//! generator), plus a concrete tracker that turns elapsed wall-clock time and call depth into
//! [`ErrorKind::Timeout`]/[`ErrorKind::Stack`] errors.

use std::time::{Duration, Instant};

use crate::error::{ErrorKind, PklError};

/// Recommended maximum force/call depth if the host does not configure one.
///
/// Pkl object graphs are usually shallow (a handful of amend layers); 512 is generous
/// headroom while still catching runaway self-referential `new` expressions before the
/// native call stack overflows.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Polled by the evaluation engine before starting work that could run unboundedly:
/// a top-level module force, a method call, or a generator step.
pub trait ResourceTracker: std::fmt::Debug {
    /// Called before recursing one level deeper (entering `super`, a method call, a nested
    /// `new { ... }`). Returns the timeout/stack error if the configured limit is exceeded.
    fn check_depth(&self, current_depth: usize) -> Result<(), PklError>;

    /// Called at force/statement-like boundaries to check the wall-clock deadline.
    fn check_time(&mut self) -> Result<(), PklError>;
}

/// Configuration for the default [`LimitedTracker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    pub max_depth: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_depth: Some(DEFAULT_MAX_DEPTH),
            timeout: None,
        }
    }

    #[must_use]
    pub fn max_depth(mut self, limit: usize) -> Self {
        self.max_depth = Some(limit);
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// A tracker with no limits at all. Useful for tests and one-shot library embeddings that
/// trust their inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    fn check_depth(&self, _current_depth: usize) -> Result<(), PklError> {
        Ok(())
    }

    fn check_time(&mut self) -> Result<(), PklError> {
        Ok(())
    }
}

/// The tracker installed by [`crate::session::Evaluator`] unless the host opts out.
///
/// `start_time` is recorded the moment the tracker is created, so it should be built
/// immediately before a top-level evaluation begins (see §4.6: "Evaluation of a top-level
/// source module must complete within the configured timeout").
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn check_depth(&self, current_depth: usize) -> Result<(), PklError> {
        let max = self.limits.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        if current_depth >= max {
            return Err(PklError::new(
                ErrorKind::Stack,
                format!("maximum evaluation depth exceeded ({current_depth} >= {max})"),
            ));
        }
        Ok(())
    }

    fn check_time(&mut self) -> Result<(), PklError> {
        if let Some(limit) = self.limits.timeout {
            let elapsed = self.start_time.elapsed();
            if elapsed > limit {
                return Err(PklError::new(
                    ErrorKind::Timeout,
                    format!("evaluation timed out after {elapsed:?} (limit {limit:?})"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_limit_trips_past_the_configured_maximum() {
        let tracker = LimitedTracker::new(ResourceLimits::new().max_depth(4));
        assert!(tracker.check_depth(3).is_ok());
        assert!(tracker.check_depth(4).is_err());
    }

    #[test]
    fn timeout_trips_once_elapsed_exceeds_the_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().timeout(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(tracker.check_time().unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test]
    fn no_limit_tracker_never_trips() {
        let mut tracker = NoLimitTracker;
        assert!(tracker.check_depth(usize::MAX).is_ok());
        assert!(tracker.check_time().is_ok());
    }
}
