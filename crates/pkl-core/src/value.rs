//! The closed, tagged value union (§3 "Object value" table) and the object-like storage that
//! backs Typed/Dynamic/Listing/Mapping (§3 "object-like value", §4.4 amendment).
//!
//! Grounded on the teacher's split between an internal `Value` representation and a
//! forced-for-inspection `Object` shape (`object.rs`): scalars are represented inline, while
//! collections and object-like values live behind a reference-counted handle so that amending
//! an object can share its parent's member definitions by reference (§9 "Tagged value
//! variant"). The teacher's manual `HeapId`/`HeapData` refcounting is not reused — Pkl object
//! graphs are acyclic by invariant (§3 "Parent chains are acyclic"), so plain `Rc` with no
//! cycle collector is sufficient and considerably simpler.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use regex::Regex;
use smallvec::SmallVec;

use crate::ast::Member;
use crate::frame::FrameInstance;
use crate::intern::StringId;

/// Magnitude + unit pair backing `Duration` and `DataSize` (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity<U> {
    pub magnitude: f64,
    pub unit: U,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Ns,
    Us,
    Ms,
    S,
    Min,
    H,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSizeUnit {
    B,
    Kb,
    Mb,
    Gb,
    Tb,
    Pb,
    Kib,
    Mib,
    Gib,
    Tib,
    Pib,
}

/// A structural, hashable stand-in for a [`Value`] used as a Map/Set/entry key. Covers the
/// scalar key shapes Pkl programs actually use; compound (object-like) keys fall back to
/// pointer identity, which is sound (two distinct objects are never `==`) though not fully
/// structural — documented in DESIGN.md as a pragmatic simplification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    String(Rc<str>),
    Identity(usize),
}

impl ValueKey {
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Boolean(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) => ValueKey::FloatBits(f.to_bits()),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Object(obj) => ValueKey::Identity(Rc::as_ptr(obj) as usize),
            _ => ValueKey::Identity(0),
        }
    }
}

/// The key under which a member is stored in an object's ordered map (§3 "member key").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    Property(StringId),
    Entry(ValueKey),
    Element(u32),
}

/// What kind of object-like value an [`ObjectData`] backs. Determines which member-key shapes
/// are valid and how amendment parent-typing is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Typed,
    Dynamic,
    Listing,
    Mapping,
}

/// An immutable, shared link in a member's override chain: `def` is the member currently
/// active, `owner` is the object that declared it, `previous` is the member it shadowed (used
/// by `super`, §4.5). Cloning this across an amendment is the "members are shared by
/// reference" half of §3's invariants.
#[derive(Debug)]
pub struct MemberDef {
    pub member: Rc<Member>,
    pub owner: Weak<ObjectData>,
    pub previous: Option<Rc<MemberDef>>,
    /// The lexical frame this body closes over (let-bindings, generator loop variables, method
    /// parameters) — `None` for members with no enclosing locals. Carried on the definition
    /// rather than the slot so amendment-shared definitions keep their original closure.
    pub frame: Option<Rc<FrameInstance>>,
}

/// One slot in an object's member map: a (possibly inherited) definition plus this object's
/// own memoization cell — memoization is per-receiver even when the definition is shared
/// (§3 "only memoization slots differ per instance").
#[derive(Debug)]
pub struct MemberSlot {
    pub def: Rc<MemberDef>,
    pub memo: RefCell<Option<Value>>,
}

/// The backing store for a Typed/Dynamic/Listing/Mapping value.
#[derive(Debug)]
pub struct ObjectData {
    pub kind: ObjectKind,
    pub class_name: Option<String>,
    pub parent: Option<Rc<ObjectData>>,
    pub owner: Option<Weak<ObjectData>>,
    pub members: RefCell<IndexMap<MemberKey, Rc<MemberSlot>>>,
    pub next_element_index: std::cell::Cell<u32>,
}

impl ObjectData {
    #[must_use]
    pub fn new_root(kind: ObjectKind, class_name: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            class_name,
            parent: None,
            owner: None,
            members: RefCell::new(IndexMap::new()),
            next_element_index: std::cell::Cell::new(0),
        })
    }

    /// Starts an amendment: clones the parent's flattened member map (cheap — definitions are
    /// `Rc`s) with fresh, empty memo cells, as the basis for overlay (§4.4).
    #[must_use]
    pub fn begin_amend(parent: &Rc<Self>, owner: Option<Weak<ObjectData>>) -> IndexMap<MemberKey, Rc<MemberSlot>> {
        parent
            .members
            .borrow()
            .iter()
            .map(|(key, slot)| {
                (
                    key.clone(),
                    Rc::new(MemberSlot {
                        def: slot.def.clone(),
                        memo: RefCell::new(None),
                    }),
                )
            })
            .collect()
    }

    /// Overlays (or inserts) `member` at `key`, linking to whatever definition previously
    /// occupied that key so `super` can still reach it (§4.4 "Member overlay rules").
    pub fn overlay(
        members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
        key: MemberKey,
        member: Rc<Member>,
        owner: Weak<ObjectData>,
        frame: Option<Rc<FrameInstance>>,
    ) {
        let previous = members.get(&key).map(|slot| slot.def.clone());
        let def = Rc::new(MemberDef { member, owner, previous, frame });
        members.insert(
            key,
            Rc::new(MemberSlot {
                def,
                memo: RefCell::new(None),
            }),
        );
    }

    /// Erases `key` from this object's view (a `delete` modifier); the parent's copy, if any,
    /// is untouched since it lives in a separate `IndexMap`.
    pub fn delete(members: &mut IndexMap<MemberKey, Rc<MemberSlot>>, key: &MemberKey) {
        members.shift_remove(key);
    }
}

/// The runtime value type (§3). Scalars inline; object-like and collection values behind
/// `Rc` so amendment can share structure.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Duration(Quantity<DurationUnit>),
    DataSize(Quantity<DataSizeUnit>),
    Pair(Rc<(Value, Value)>),
    IntSeq { start: i64, end: i64, step: i64 },
    Regex(Rc<Regex>),
    List(Rc<Vec<Value>>),
    Set(Rc<IndexMap<ValueKey, Value>>),
    Map(Rc<IndexMap<ValueKey, Value>>),
    /// Typed, Dynamic, Listing, and Mapping all share [`ObjectData`]; `kind` distinguishes them.
    Object(Rc<ObjectData>),
    Class { name: Rc<str> },
    TypeAlias { name: Rc<str> },
    Function(Rc<crate::function::FunctionValue>),
}

impl Value {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Duration(_) => "Duration",
            Value::DataSize(_) => "DataSize",
            Value::Pair(_) => "Pair",
            Value::IntSeq { .. } => "IntSeq",
            Value::Regex(_) => "Regex",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
            Value::Object(obj) => match obj.kind {
                ObjectKind::Typed => "Typed",
                ObjectKind::Dynamic => "Dynamic",
                ObjectKind::Listing => "Listing",
                ObjectKind::Mapping => "Mapping",
            },
            Value::Class { .. } => "Class",
            Value::TypeAlias { .. } => "TypeAlias",
            Value::Function(_) => "Function",
        }
    }

    /// Structural equality per §4.6 ("equality is structural"); object-like values compare by
    /// identity since two distinct `new {}` results are never equal even with the same shape.
    #[must_use]
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A fixed-capacity scratch buffer type used by the evaluator for short element/argument
/// lists, matching the teacher's preference for `SmallVec` over `Vec` in hot inner loops.
pub type ArgBuf = SmallVec<[Value; 4]>;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_objects_are_never_structurally_equal() {
        let a = ObjectData::new_root(ObjectKind::Dynamic, None);
        let b = ObjectData::new_root(ObjectKind::Dynamic, None);
        assert!(!Value::Object(a).structural_eq(&Value::Object(b.clone())));
        assert!(Value::Object(b.clone()).structural_eq(&Value::Object(b)));
    }

    #[test]
    fn value_key_treats_equal_strings_as_the_same_key() {
        let a = ValueKey::from_value(&Value::String("x".into()));
        let b = ValueKey::from_value(&Value::String("x".into()));
        assert_eq!(a, b);
    }
}
