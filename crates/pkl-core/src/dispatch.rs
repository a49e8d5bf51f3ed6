//! The "one worker per evaluator, requests serialized" discipline (§5) modeled as a small
//! in-process scheduler, with no networking attached — the wire protocol itself is server
//! surface, out of scope for this crate (§1).
//!
//! Grounded on the teacher's iterative `Runner::start`/`RunProgress` state machine in
//! `run.rs`: a host drives execution one request at a time and only ever holds one in-flight
//! request per worker. Here a "request" is a single [`crate::session::Evaluator`] method call
//! (`evaluate_module` or `force`) rather than a VM step, since Pkl evaluation in this crate is
//! not itself suspendable.

use crate::error::{ErrorKind, PklError};
use crate::session::Evaluator;

/// Owns a single [`Evaluator`] and refuses to let a second request start while one is already
/// in flight, matching §5's "requests to a given evaluator are processed serially" rule for a
/// host that dispatches work from multiple call sites into one worker.
pub struct EvaluatorHandle {
    evaluator: Evaluator,
    busy: bool,
}

impl EvaluatorHandle {
    #[must_use]
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator, busy: false }
    }

    /// Runs `request` against the owned evaluator, returning its result.
    ///
    /// # Errors
    /// Returns an [`ErrorKind::Bug`] error if called re-entrantly while a prior request on
    /// this same handle has not finished (this would indicate a host bug, not evaluator state
    /// corruption, since `request` itself runs to completion before returning).
    pub fn dispatch<T>(&mut self, request: impl FnOnce(&mut Evaluator) -> Result<T, PklError>) -> Result<T, PklError> {
        if self.busy {
            return Err(PklError::new(ErrorKind::Bug, "evaluator handle re-entered while a request was in flight"));
        }
        self.busy = true;
        let result = request(&mut self.evaluator);
        self.busy = false;
        result
    }

    #[must_use]
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EvaluatorSettings;

    #[test]
    fn dispatch_runs_the_request_against_the_owned_evaluator() {
        let mut handle = EvaluatorHandle::new(EvaluatorSettings::new().build().unwrap());
        let result = handle.dispatch(|evaluator| Ok(evaluator.env().len()));
        assert_eq!(result.unwrap(), 0);
    }
}
