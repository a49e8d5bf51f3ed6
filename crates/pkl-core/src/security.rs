//! The security manager: the allow-list checked by [`crate::loader`] before any absolute URI
//! or local path is opened.
//!
//! Grounded on the teacher's capability-based permission system (`CapabilitySet`/`Capability`):
//! a small, immutable, per-evaluator set of grants checked at a single well-defined boundary.
//! Here the boundary is URI resolution rather than an external-function yield point, and the
//! grants are schemes/root-dirs rather than function names.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, PklError};

/// One allowed URI scheme, as configured by the host ("allowed schemes" in the evaluator
/// settings from §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowedScheme {
    /// A built-in scheme handled by the module key factory (`file`, `https`, `package`, ...).
    Builtin(&'static str),
    /// A user-supplied scheme registered by the host.
    Custom(String),
}

impl fmt::Display for AllowedScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(name) => f.write_str(name),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Per-evaluator security policy: which schemes may be resolved absolutely, and (for local
/// files) which root directory resolved paths must stay beneath.
///
/// Constructed once per evaluator and then immutable (§5: "The HTTP client, allowed-URI
/// matchers, environment snapshot and external-property map are constructed per evaluator
/// and then immutable").
#[derive(Debug, Clone)]
pub struct SecurityManager {
    allowed_schemes: Vec<AllowedScheme>,
    allowed_resource_schemes: Vec<AllowedScheme>,
    root_dir: Option<PathBuf>,
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityManager {
    /// The default set of schemes the reference CLI would allow out of the box.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_schemes: vec![
                AllowedScheme::Builtin("file"),
                AllowedScheme::Builtin("modulepath"),
                AllowedScheme::Builtin("https"),
                AllowedScheme::Builtin("package"),
                AllowedScheme::Builtin("projectpackage"),
                AllowedScheme::Builtin("repl"),
                AllowedScheme::Builtin("pkl"),
            ],
            allowed_resource_schemes: vec![
                AllowedScheme::Builtin("file"),
                AllowedScheme::Builtin("https"),
                AllowedScheme::Builtin("env"),
                AllowedScheme::Builtin("prop"),
            ],
            root_dir: None,
        }
    }

    /// A policy that denies every absolute import, for hosts that only want to evaluate a
    /// single self-contained module with relative imports.
    #[must_use]
    pub fn none() -> Self {
        Self {
            allowed_schemes: Vec::new(),
            allowed_resource_schemes: Vec::new(),
            root_dir: None,
        }
    }

    #[must_use]
    pub fn allow_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.allowed_schemes.push(AllowedScheme::Custom(scheme.into()));
        self
    }

    #[must_use]
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    /// Checks a module-import scheme against the allow-list.
    pub fn check_module_scheme(&self, scheme: &str) -> Result<(), PklError> {
        if self.scheme_allowed(&self.allowed_schemes, scheme) {
            Ok(())
        } else {
            Err(PklError::new(
                ErrorKind::Security,
                format!("import of scheme '{scheme}' is not permitted by the security manager"),
            ))
        }
    }

    /// Checks a resource-read scheme against the allow-list.
    pub fn check_resource_scheme(&self, scheme: &str) -> Result<(), PklError> {
        if self.scheme_allowed(&self.allowed_resource_schemes, scheme) {
            Ok(())
        } else {
            Err(PklError::new(
                ErrorKind::Security,
                format!("read of resource scheme '{scheme}' is not permitted by the security manager"),
            ))
        }
    }

    fn scheme_allowed(&self, list: &[AllowedScheme], scheme: &str) -> bool {
        list.iter().any(|allowed| match allowed {
            AllowedScheme::Builtin(name) => *name == scheme,
            AllowedScheme::Custom(name) => name == scheme,
        })
    }

    /// Enforces the root-dir guard (§4.1): a resolved local path, after symlink
    /// normalization, must lie beneath the configured root.
    pub fn check_root_dir(&self, resolved_path: &Path) -> Result<(), PklError> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        if resolved_path.starts_with(root) {
            Ok(())
        } else {
            Err(PklError::new(
                ErrorKind::Security,
                format!(
                    "refusing to load '{}': outside configured root directory '{}'",
                    resolved_path.display(),
                    root.display()
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_the_documented_schemes() {
        let sec = SecurityManager::new();
        assert!(sec.check_module_scheme("file").is_ok());
        assert!(sec.check_module_scheme("package").is_ok());
        assert!(sec.check_module_scheme("ftp").is_err());
    }

    #[test]
    fn none_policy_denies_everything() {
        let sec = SecurityManager::none();
        assert!(sec.check_module_scheme("file").is_err());
    }

    #[test]
    fn root_dir_guard_rejects_paths_outside_the_root() {
        let sec = SecurityManager::new().root_dir("/workspace/project");
        assert!(sec.check_root_dir(Path::new("/workspace/project/a.pkl")).is_ok());
        assert!(sec.check_root_dir(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn custom_scheme_can_be_granted() {
        let sec = SecurityManager::none().allow_scheme("s3");
        assert!(sec.check_module_scheme("s3").is_ok());
        assert!(sec.check_module_scheme("file").is_err());
    }
}
