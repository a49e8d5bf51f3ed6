//! First-class function/method closures (§3 "Function", §4.5 "Methods").
//!
//! Grounded on the teacher's closure representation: a function value is its parameter list
//! plus the body IR plus the frame instance it closed over; calling it allocates a fresh child
//! frame rather than mutating the captured one.

use std::rc::{Rc, Weak};

use crate::ast::Expr;
use crate::frame::FrameInstance;
use crate::intern::StringId;
use crate::symtab::FrameDescriptor;
use crate::value::ObjectData;

/// One formal parameter. The anonymous `_` pattern is represented as `name: None` and is
/// exempt from the entry-type-check §4.5 calls out ("unless they are the anonymous `_`
/// pattern").
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<StringId>,
    pub type_annotation: Option<crate::ast::TypeNode>,
}

/// A first-class function or method closure.
#[derive(Debug)]
pub struct FunctionValue {
    pub params: Vec<Param>,
    pub frame_descriptor: FrameDescriptor,
    pub body: Rc<Expr>,
    /// The frame this closure captured; `None` for a closure with no enclosing locals (a
    /// plain stdlib-free top-level method).
    pub captured_frame: Option<Rc<FrameInstance>>,
    /// The object this method is bound to, for `this`/`super` resolution inside its body.
    pub owner: Option<Weak<ObjectData>>,
    /// Stdlib methods skip return-type checking even under test (§4.5).
    pub is_stdlib: bool,
}

impl FunctionValue {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether return-type checking applies to a call of this function (§4.5: "return type is
    /// checked unless the method belongs to the stdlib").
    #[must_use]
    pub fn checks_return_type(&self) -> bool {
        !self.is_stdlib
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    fn dummy_body() -> Rc<Expr> {
        Rc::new(Expr::Literal(Literal::Int(1), crate::error::CodeRange::new(0, 1)))
    }

    #[test]
    fn stdlib_function_skips_return_type_checking() {
        let f = FunctionValue {
            params: vec![],
            frame_descriptor: FrameDescriptor::new(),
            body: dummy_body(),
            captured_frame: None,
            owner: None,
            is_stdlib: true,
        };
        assert!(!f.checks_return_type());
    }
}
