//! Runtime frames: the array-of-slots instances that back a [`crate::symtab::FrameDescriptor`]
//! at evaluation time (§9 "Frames vs closures").
//!
//! Grounded on the teacher's namespace design: a frame descriptor is a compile-time shape,
//! a frame instance is the runtime array, and a closure captures its defining instance by
//! reference (an `Rc` here, a GC handle in the teacher) rather than copying values out.

use std::cell::RefCell;
use std::rc::Rc;

use crate::symtab::SlotId;
use crate::value::Value;

/// One runtime activation of a [`crate::symtab::FrameDescriptor`]: an ordered array of slot
/// values plus a link to the enclosing frame a closure captured.
#[derive(Debug)]
pub struct FrameInstance {
    slots: RefCell<Vec<Option<Value>>>,
    pub parent: Option<Rc<FrameInstance>>,
}

impl FrameInstance {
    #[must_use]
    pub fn new(slot_count: usize, parent: Option<Rc<FrameInstance>>) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(vec![None; slot_count]),
            parent,
        })
    }

    pub fn set(&self, slot: SlotId, value: Value) {
        self.slots.borrow_mut()[slot.0 as usize] = Some(value);
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<Value> {
        self.slots.borrow()[slot.0 as usize].clone()
    }

    /// Walks `depth_up` enclosing frames (as computed by [`crate::symtab::SymbolTable::resolve`])
    /// and reads `slot` from the frame found there.
    #[must_use]
    pub fn get_at_depth(self: &Rc<Self>, depth_up: u32, slot: SlotId) -> Option<Value> {
        let mut current = Rc::clone(self);
        for _ in 0..depth_up {
            current = Rc::clone(current.parent.as_ref()?);
        }
        current.get(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::SlotId;

    #[test]
    fn set_and_get_round_trip_within_one_frame() {
        let frame = FrameInstance::new(2, None);
        frame.set(SlotId(0), Value::Int(42));
        assert!(matches!(frame.get(SlotId(0)), Some(Value::Int(42))));
        assert!(frame.get(SlotId(1)).is_none());
    }

    #[test]
    fn get_at_depth_walks_enclosing_frames() {
        let outer = FrameInstance::new(1, None);
        outer.set(SlotId(0), Value::Int(7));
        let inner = FrameInstance::new(1, Some(outer));
        assert!(matches!(inner.get_at_depth(1, SlotId(0)), Some(Value::Int(7))));
        assert!(inner.get_at_depth(0, SlotId(0)).is_none());
    }
}
