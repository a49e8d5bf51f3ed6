//! String interning for identifiers.
//!
//! Property names, entry-key text, and qualified names are repeated constantly across an
//! object graph (every amendment re-mentions the parent's member names). Interning them once
//! keeps member-map keys to a `Copy` 32-bit id instead of a fresh heap `String` per occurrence,
//! and turns name comparison during scope resolution into an integer compare.

use std::fmt;

use ahash::AHashMap;

/// An interned identifier. Cheap to copy, compare, and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// A sentinel id for synthetic members (entries/elements) whose `MemberKey` doesn't key on
    /// a name at all — `Member::name` still needs a value, but nothing ever resolves it.
    #[must_use]
    pub(crate) fn placeholder() -> Self {
        StringId(u32::MAX)
    }
}

/// The table backing [`StringId`]. One instance is shared by every module loaded into an
/// evaluator, since identifiers like `name` or `value` recur across every module.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text`, returning its id. Interning the same text twice returns the same id.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(id) = self.lookup.get(text) {
            return *id;
        }
        let id = StringId(self.strings.len().try_into().expect("interner overflow"));
        let boxed: Box<str> = text.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    /// Resolves an id back to text.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this interner instance.
    #[must_use]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_text_returns_the_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("name");
        let b = interner.intern("name");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "name");
    }

    #[test]
    fn distinct_text_gets_distinct_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("name");
        let b = interner.intern("age");
        assert_ne!(a, b);
    }
}
