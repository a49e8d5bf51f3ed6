//! The loaded-module record (§3 "Module"): key, resolved text/URI, inferred metadata, and the
//! compiled module object.
//!
//! Grounded on the teacher's `types/module.rs` (`Module` struct pairing a name with an
//! attribute dict, plus `get_attr`/`set_attr` accessors) — generalized from a flat attribute
//! dict to Pkl's richer `ModuleInfo` (declared vs. inferred name, amend/extends parent, doc
//! ranges) and an `ObjectData`-backed module object instead of a plain dict.

use std::rc::Rc;

use crate::error::CodeRange;
use crate::uri::Uri;
use crate::value::ObjectData;

/// How a module's name was determined (§3: "name inferred from URI or declared via header").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleName {
    Declared(String),
    InferredFromUri(String),
}

/// `amends`/`extends` relationship declared in a module header, if any.
#[derive(Debug, Clone)]
pub enum ModuleParent {
    Amends(Uri),
    Extends(Uri),
    None,
}

/// Metadata inferred or declared about a module, independent of its evaluated object value.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: ModuleName,
    pub parent: ModuleParent,
    pub doc_ranges: Vec<CodeRange>,
}

/// An immutable, fully-loaded module record (§3). Created once per `resolvedKey` and held for
/// the evaluator's lifetime (§3 "Lifecycle").
#[derive(Debug)]
pub struct Module {
    pub module_key: Uri,
    pub resolved_uri: Uri,
    pub text: String,
    pub info: ModuleInfo,
    pub object: Rc<ObjectData>,
}

impl Module {
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.info.name {
            ModuleName::Declared(name) | ModuleName::InferredFromUri(name) => name,
        }
    }

    /// Infers a module name from its resolved URI's last path segment, stripping any `.pkl`
    /// extension — the fallback used when no header `module` declaration is present.
    #[must_use]
    pub fn infer_name_from_uri(uri: &Uri) -> String {
        let last_segment = uri.path.rsplit('/').next().unwrap_or(&uri.path);
        last_segment.strip_suffix(".pkl").unwrap_or(last_segment).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_module_name_by_stripping_the_pkl_extension() {
        let uri = Uri::parse("file:///a/b/Config.pkl").unwrap();
        assert_eq!(Module::infer_name_from_uri(&uri), "Config");
    }
}
