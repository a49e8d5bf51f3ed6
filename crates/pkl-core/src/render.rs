//! The renderer contract (§6): "a value + options -> serialized bytes/text".
//!
//! Modeled as a trait only — JSON/YAML/XML/plist/Pcf output is explicitly out of scope (§1).
//! This module exists so hosts have a documented seam to plug a renderer into, and so the
//! evaluation core's public API (`Evaluator::force`, §5) has a natural handoff point
//! ("Projection" in §2's pipeline) without the core depending on a serialization format.

use crate::value::Value;

/// Options a renderer is configured with; left intentionally sparse since concrete formats
/// live outside this crate.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub indent: String,
}

pub trait Renderer: std::fmt::Debug {
    fn render(&self, value: &Value, options: &RenderOptions) -> Result<Vec<u8>, crate::error::PklError>;
}
