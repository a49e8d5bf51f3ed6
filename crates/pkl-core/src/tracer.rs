//! The evaluator's sole observability seam (§10 in `SPEC_FULL.md`; §5 "Log messages emitted
//! by an evaluator arrive in the order of emission on its worker").
//!
//! Grounded directly on the teacher's own abstention from a logging crate: `VmTracer` is a
//! hand-rolled trait the host implements, not a `tracing`/`log` subscriber.

use crate::error::PklError;

/// One observable event an evaluator can emit, in emission order.
#[derive(Debug, Clone)]
pub enum VmEvent {
    /// A Pkl `trace()` call or stdlib `Logger` statement.
    Log { message: String, qualified_name: String },
    ForceStart { qualified_name: String },
    ForceEnd { qualified_name: String },
    ImportResolved { spec: String, resolved: String },
}

/// Implemented by the host to receive evaluator events. The default `NullTracer` discards
/// everything, matching an evaluator built with no observability wired up.
pub trait VmTracer: std::fmt::Debug {
    fn on_event(&mut self, event: VmEvent);

    fn on_error(&mut self, _error: &PklError) {}
}

#[derive(Debug, Default)]
pub struct NullTracer;

impl VmTracer for NullTracer {
    fn on_event(&mut self, _event: VmEvent) {}
}

/// Collects every event in order, for tests that assert on tracer output.
#[derive(Debug, Default)]
pub struct VecTracer {
    pub events: Vec<VmEvent>,
}

impl VmTracer for VecTracer {
    fn on_event(&mut self, event: VmEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_tracer_preserves_emission_order() {
        let mut tracer = VecTracer::default();
        tracer.on_event(VmEvent::ForceStart { qualified_name: "a".into() });
        tracer.on_event(VmEvent::ForceEnd { qualified_name: "a".into() });
        assert_eq!(tracer.events.len(), 2);
        assert!(matches!(tracer.events[0], VmEvent::ForceStart { .. }));
    }
}
