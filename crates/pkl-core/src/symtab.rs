//! The lexical symbol table: scope stack, frame descriptors, name resolution, and the
//! const-level discipline (§4.3 "Scopes", "Name resolution", "Const discipline").
//!
//! Grounded on the teacher's `namespace.rs` (`NamespaceId`/`Namespace`/`Namespaces`:
//! frame-slot-based scoping where each scope owns an ordered array of named slots, and
//! enclosing scopes are walked by index rather than by pointer-chasing). Generalized here
//! from Python's single flat local/enclosing/global split to Pkl's richer scope-kind list and
//! its monotonic `constLevel`.

use crate::error::{ErrorKind, PklError};
use crate::intern::StringId;

/// The kind of a single scope frame (§4.3 "Scopes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    /// Implicit `pkl:base`, present only in non-base modules.
    Base,
    Class,
    TypeAlias,
    Method,
    Lambda,
    Property,
    Entry,
    Object,
    /// Used by type constraints and member predicates; binds `this` to the value under test.
    CustomThis,
    Annotation,
    ForGenerator,
    /// Variable-resolution only; never itself resolved into for enclosing-counter purposes.
    ForEager,
}

/// How restrictive name resolution is within a scope. Never decreases descending the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConstLevel {
    None,
    Module,
    All,
}

/// One named local or parameter slot within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub u32);

/// The compile-time shape of a frame: an ordered list of slot names, separate from the
/// runtime frame instance that holds their values (§9 "Frames vs closures").
#[derive(Debug, Clone, Default)]
pub struct FrameDescriptor {
    slots: Vec<StringId>,
}

impl FrameDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_slot(&mut self, name: StringId) -> SlotId {
        let id = SlotId(self.slots.len().try_into().expect("frame overflow"));
        self.slots.push(name);
        id
    }

    #[must_use]
    pub fn find(&self, name: StringId) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|&s| s == name)
            .map(|idx| SlotId(idx.try_into().expect("frame overflow")))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One scope on the stack.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: String,
    pub const_level: ConstLevel,
    pub frame: FrameDescriptor,
    pub type_params: Vec<StringId>,
}

impl Scope {
    #[must_use]
    pub fn new(kind: ScopeKind, name: impl Into<String>, const_level: ConstLevel) -> Self {
        Self {
            kind,
            name: name.into(),
            const_level,
            frame: FrameDescriptor::new(),
            type_params: Vec::new(),
        }
    }
}

/// The outcome of resolving an unqualified identifier (§4.3 "Name resolution").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    LexicalLocal { depth_up: u32, slot: SlotId },
    /// A method in an enclosing class; `is_virtual` reflects the class's `open`/`abstract`
    /// modifiers at the point of resolution.
    LexicalMethod { is_virtual: bool },
    ClassProperty { is_local: bool },
    BaseModuleConstant,
    /// `this`/receiver-dependent; left to be resolved dynamically at runtime.
    RuntimeDynamic,
}

/// The lexical scope stack used while building IR for one module.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Scope> {
        self.scopes.last()
    }

    /// The qualified name of the current scope, built by concatenating with `#` at the
    /// module boundary and `.` elsewhere (§4.3), quoting identifiers when they need it.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        let mut out = String::new();
        for (idx, scope) in self.scopes.iter().enumerate() {
            if idx == 0 {
                out.push_str(&quote_if_needed(&scope.name));
                continue;
            }
            let sep = if scope.kind == ScopeKind::Module { '#' } else { '.' };
            out.push(sep);
            out.push_str(&quote_if_needed(&scope.name));
        }
        out
    }

    /// The effective const-level at the current scope: the innermost (and therefore largest,
    /// since it never decreases) level on the stack.
    #[must_use]
    pub fn current_const_level(&self) -> ConstLevel {
        self.scopes
            .iter()
            .map(|s| s.const_level)
            .max()
            .unwrap_or(ConstLevel::None)
    }

    /// Climbs the scope stack looking for `name`, skipping `Lambda` scopes for the
    /// enclosing-counter and skipping `ForEager` scopes entirely (§4.3).
    pub fn resolve(&self, name: StringId) -> Resolution {
        let mut depth_up = 0u32;
        for scope in self.scopes.iter().rev() {
            if scope.kind == ScopeKind::ForEager {
                continue;
            }
            if let Some(slot) = scope.frame.find(name) {
                return Resolution::LexicalLocal { depth_up, slot };
            }
            if scope.kind != ScopeKind::Lambda {
                depth_up += 1;
            }
            match scope.kind {
                ScopeKind::Class => return Resolution::ClassProperty { is_local: false },
                ScopeKind::Base => return Resolution::BaseModuleConstant,
                ScopeKind::Object | ScopeKind::CustomThis => return Resolution::RuntimeDynamic,
                _ => {}
            }
        }
        Resolution::RuntimeDynamic
    }

    /// Validates a reference to `this`/`outer`/`module`/a property from the current (possibly
    /// const) scope against the target's own const-level (§4.3 "Const discipline").
    pub fn check_const_access(&self, target_level: ConstLevel, what: &str) -> Result<(), PklError> {
        let current = self.current_const_level();
        if current == ConstLevel::None || target_level >= current {
            return Ok(());
        }
        let message = match what {
            "this" => "`this` is not const in this scope".to_string(),
            "outer" => "`outer` is not const in this scope".to_string(),
            "module" => "`module` is not const in this class/annotation scope".to_string(),
            other => format!("'{other}' needs to be const to be read from this scope"),
        };
        Err(PklError::new(ErrorKind::NameResolution, message))
    }
}

fn quote_if_needed(name: &str) -> String {
    let needs_quoting = name.is_empty()
        || !name.chars().next().unwrap().is_alphabetic() && name.chars().next() != Some('_')
        || name.chars().any(|c| !(c.is_alphanumeric() || c == '_'));
    if needs_quoting {
        format!("`{name}`")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn qualified_name_uses_hash_at_module_boundary() {
        let mut table = SymbolTable::new();
        table.push(Scope::new(ScopeKind::Module, "mod", ConstLevel::None));
        table.push(Scope::new(ScopeKind::Class, "Foo", ConstLevel::None));
        table.push(Scope::new(ScopeKind::Method, "bar", ConstLevel::None));
        assert_eq!(table.qualified_name(), "mod#Foo.bar");
    }

    #[test]
    fn const_level_never_decreases_descending_the_stack() {
        let mut table = SymbolTable::new();
        table.push(Scope::new(ScopeKind::Module, "mod", ConstLevel::Module));
        table.push(Scope::new(ScopeKind::Method, "f", ConstLevel::None));
        assert_eq!(table.current_const_level(), ConstLevel::Module);
    }

    #[test]
    fn lexical_local_is_found_in_the_nearest_frame() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut table = SymbolTable::new();
        let mut outer = Scope::new(ScopeKind::Method, "outer", ConstLevel::None);
        outer.frame.add_slot(x);
        table.push(outer);
        table.push(Scope::new(ScopeKind::Lambda, "inner", ConstLevel::None));
        match table.resolve(x) {
            Resolution::LexicalLocal { depth_up, .. } => assert_eq!(depth_up, 0),
            other => panic!("expected lexical local, got {other:?}"),
        }
    }

    #[test]
    fn for_eager_scopes_are_skipped_entirely() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut table = SymbolTable::new();
        let mut eager = Scope::new(ScopeKind::ForEager, "eager", ConstLevel::None);
        eager.frame.add_slot(x);
        table.push(eager);
        table.push(Scope::new(ScopeKind::Class, "C", ConstLevel::None));
        assert_eq!(table.resolve(x), Resolution::ClassProperty { is_local: false });
    }

    #[test]
    fn const_access_from_a_const_scope_to_a_non_const_target_is_rejected() {
        let mut table = SymbolTable::new();
        table.push(Scope::new(ScopeKind::Module, "mod", ConstLevel::All));
        assert!(table.check_const_access(ConstLevel::None, "this").is_err());
        assert!(table.check_const_access(ConstLevel::All, "this").is_ok());
    }
}
