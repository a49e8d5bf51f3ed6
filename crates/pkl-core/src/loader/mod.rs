//! Module and resource loading: URI resolution, the reader traits external hosts implement,
//! and the on-disk package cache (§4.1, §4.2, §6).
//!
//! Grounded on the Boa JS engine's `ModuleLoader` trait (`other_examples/`): a small trait the
//! host implements, plus a `root`-relative default resolver the loader falls back to for the
//! `file` scheme. Pkl's loader additionally dispatches by scheme to `modulepath`, `package`,
//! `projectpackage`, and `repl`, none of which Boa's loader needs.

pub mod package_cache;
pub mod project;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, PklError};
use crate::security::SecurityManager;
use crate::uri::{PackageUri, Uri};
use package_cache::PackageCache;

/// One entry returned by a directory listing (`glob`/`list` reader operations, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    pub name: String,
    pub is_directory: bool,
}

/// The module-source contract from §6: `(ResolvedKey) -> Result<Text, IoError>`, supplied per
/// scheme by the host for anything the loader does not resolve itself (`https`, custom
/// schemes registered via [`SecurityManager::allow_scheme`]).
pub trait ModuleReader: std::fmt::Debug {
    fn scheme(&self) -> &str;
    fn has_hierarchical_uris(&self) -> bool;
    fn is_local(&self) -> bool;
    fn is_globbable(&self) -> bool {
        false
    }
    fn read(&self, uri: &Uri) -> Result<String, PklError>;
    fn list(&self, _base: &Uri) -> Result<Vec<PathElement>, PklError> {
        Err(PklError::new(
            ErrorKind::Io,
            format!("reader for scheme '{}' does not support listing", self.scheme()),
        ))
    }
}

/// The resource-reader contract from §6: bytes/text plus optional glob/has.
pub trait ResourceReader: std::fmt::Debug {
    fn scheme(&self) -> &str;
    fn has_hierarchical_uris(&self) -> bool;
    fn is_local(&self) -> bool;
    fn is_globbable(&self) -> bool {
        false
    }
    fn read(&self, uri: &Uri) -> Result<Vec<u8>, PklError>;
    fn has(&self, uri: &Uri) -> bool;
    fn list(&self, _base: &Uri) -> Result<Vec<PathElement>, PklError> {
        Err(PklError::new(
            ErrorKind::Io,
            format!("reader for scheme '{}' does not support listing", self.scheme()),
        ))
    }
}

/// The text plus final URI a module resolved to, after any redirects (package resolution,
/// `modulepath` search) — spec §3 "Module": `resolvedKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub uri: Uri,
    pub text: String,
}

/// Ties together URI resolution, the built-in `file`/`modulepath`/`repl` handling, host
/// readers for every other scheme, and the package cache for `package:`/`projectpackage:`.
#[derive(Debug)]
pub struct ModuleLoader {
    security: SecurityManager,
    module_path: Vec<PathBuf>,
    root_dir: Option<PathBuf>,
    repl_text: Option<String>,
    module_readers: Vec<Box<dyn ModuleReader>>,
    resource_readers: Vec<Box<dyn ResourceReader>>,
    package_cache: Option<PackageCache>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(security: SecurityManager) -> Self {
        Self {
            security,
            module_path: Vec::new(),
            root_dir: None,
            repl_text: None,
            module_readers: Vec::new(),
            resource_readers: Vec::new(),
            package_cache: None,
        }
    }

    #[must_use]
    pub fn module_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.module_path = dirs;
        self
    }

    #[must_use]
    pub fn root_dir(mut self, dir: PathBuf) -> Self {
        self.root_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn repl_text(mut self, text: impl Into<String>) -> Self {
        self.repl_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_module_reader(mut self, reader: Box<dyn ModuleReader>) -> Self {
        self.module_readers.push(reader);
        self
    }

    #[must_use]
    pub fn with_resource_reader(mut self, reader: Box<dyn ResourceReader>) -> Self {
        self.resource_readers.push(reader);
        self
    }

    #[must_use]
    pub fn with_package_cache(mut self, cache: PackageCache) -> Self {
        self.package_cache = Some(cache);
        self
    }

    /// Resolves `spec` (relative or absolute) against an optional `referrer`, per §4.1.
    pub fn resolve(&self, referrer: Option<&Uri>, spec: &str) -> Result<Uri, PklError> {
        let parsed = Uri::parse(spec)?;
        let resolved = match referrer {
            Some(referrer) if parsed.is_relative() => parsed.resolve_against(referrer),
            _ => parsed,
        };

        let scheme = resolved
            .scheme()
            .ok_or_else(|| PklError::new(ErrorKind::Parse, format!("URI has no scheme: {spec}")))?;
        self.security.check_module_scheme(scheme)?;

        if scheme == "file" {
            let path = resolved.to_file_path();
            let real = fs::canonicalize(&path)
                .map_err(|e| PklError::new(ErrorKind::Io, format!("cannot resolve '{}': {e}", path.display())))?;
            self.security.check_root_dir(&real)?;
        }

        Ok(resolved)
    }

    /// Implements the `".../x"` upward-search rule (§4.1): retries `../x`, `../../x`, … up to
    /// the module root, returning the first existing candidate.
    pub fn resolve_upward(&self, referrer: &Uri, tail: &str) -> Result<Uri, PklError> {
        let referrer_dir = referrer
            .to_file_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let found = crate::uri::upward_search(&referrer_dir, tail, self.root_dir.as_deref(), |p| p.exists());
        match found {
            Some(path) => Uri::parse(&format!("file://{}", path.display())),
            None => Err(PklError::new(
                ErrorKind::Io,
                format!("upward search for '{tail}' found no match above {}", referrer_dir.display()),
            )),
        }
    }

    /// Reads module text for an already-resolved URI, dispatching by scheme.
    pub fn read(&self, uri: &Uri) -> Result<ResolvedKey, PklError> {
        match uri.scheme() {
            Some("file") => {
                let path = uri.to_file_path();
                let text = fs::read_to_string(&path)
                    .map_err(|e| PklError::new(ErrorKind::Io, format!("cannot read '{}': {e}", path.display())))?;
                Ok(ResolvedKey { uri: uri.clone(), text })
            }
            Some("modulepath") => self.read_from_module_path(uri),
            Some("repl") => {
                let text = self
                    .repl_text
                    .clone()
                    .ok_or_else(|| PklError::new(ErrorKind::Io, "no repl text buffer configured"))?;
                Ok(ResolvedKey { uri: uri.clone(), text })
            }
            Some("package" | "projectpackage") => self.read_from_package(uri),
            Some(scheme) => {
                let reader = self
                    .module_readers
                    .iter()
                    .find(|r| r.scheme() == scheme)
                    .ok_or_else(|| PklError::new(ErrorKind::Io, format!("no module reader registered for '{scheme}'")))?;
                let text = reader.read(uri)?;
                Ok(ResolvedKey { uri: uri.clone(), text })
            }
            None => Err(PklError::new(ErrorKind::Parse, "cannot read a relative URI")),
        }
    }

    fn read_from_module_path(&self, uri: &Uri) -> Result<ResolvedKey, PklError> {
        let tail = uri.path.trim_start_matches('/');
        for dir in &self.module_path {
            let candidate = dir.join(tail);
            if candidate.exists() {
                let text = fs::read_to_string(&candidate)
                    .map_err(|e| PklError::new(ErrorKind::Io, format!("cannot read '{}': {e}", candidate.display())))?;
                return Ok(ResolvedKey { uri: uri.clone(), text });
            }
        }
        Err(PklError::new(
            ErrorKind::Io,
            format!("'{tail}' not found on the configured module path"),
        ))
    }

    fn read_from_package(&self, uri: &Uri) -> Result<ResolvedKey, PklError> {
        let cache = self
            .package_cache
            .as_ref()
            .ok_or_else(|| PklError::new(ErrorKind::Package, "no package cache configured"))?;
        let package_uri = PackageUri::parse(&uri.to_string())?;
        let dir = cache.ensure_present(&package_uri)?;
        let relative = uri.fragment.as_deref().unwrap_or("");
        let path = dir.join(relative);
        let text = fs::read_to_string(&path)
            .map_err(|e| PklError::new(ErrorKind::Io, format!("cannot read '{}': {e}", path.display())))?;
        Ok(ResolvedKey { uri: uri.clone(), text })
    }

    /// Reads a resource (`read()`/`import glob` on a non-module URI, §6). `env:`/`prop:` are
    /// not dispatched here — they are evaluator-local state served directly by
    /// [`crate::session::Evaluator`], not host-pluggable I/O.
    pub fn read_resource(&self, uri: &Uri) -> Result<Vec<u8>, PklError> {
        let scheme = uri
            .scheme()
            .ok_or_else(|| PklError::new(ErrorKind::Parse, "resource URI has no scheme"))?;
        self.security.check_resource_scheme(scheme)?;
        if scheme == "file" {
            let path = uri.to_file_path();
            return fs::read(&path).map_err(|e| PklError::new(ErrorKind::Io, format!("cannot read '{}': {e}", path.display())));
        }
        let reader = self
            .resource_readers
            .iter()
            .find(|r| r.scheme() == scheme)
            .ok_or_else(|| PklError::new(ErrorKind::Io, format!("no resource reader registered for '{scheme}'")))?;
        reader.read(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubReader(&'static str, String);

    impl ModuleReader for StubReader {
        fn scheme(&self) -> &str {
            self.0
        }
        fn has_hierarchical_uris(&self) -> bool {
            true
        }
        fn is_local(&self) -> bool {
            false
        }
        fn read(&self, _uri: &Uri) -> Result<String, PklError> {
            Ok(self.1.clone())
        }
    }

    #[test]
    fn relative_spec_resolves_against_referrer() {
        let loader = ModuleLoader::new(SecurityManager::new());
        let referrer = Uri::parse("https://example.com/a/b.pkl").unwrap();
        let resolved = loader.resolve(Some(&referrer), "c.pkl").unwrap();
        assert_eq!(resolved.to_string(), "https://example.com/a/c.pkl");
    }

    #[test]
    fn disallowed_scheme_is_rejected() {
        let loader = ModuleLoader::new(SecurityManager::none());
        assert!(loader.resolve(None, "https://example.com/a.pkl").is_err());
    }

    #[test]
    fn custom_scheme_dispatches_to_registered_reader() {
        let loader = ModuleLoader::new(SecurityManager::new().allow_scheme("custom"))
            .with_module_reader(Box::new(StubReader("custom", "x = 1".into())));
        let uri = Uri::parse("custom:thing").unwrap();
        let resolved = loader.read(&uri).unwrap();
        assert_eq!(resolved.text, "x = 1");
    }

    #[test]
    fn repl_scheme_returns_the_configured_buffer() {
        let loader = ModuleLoader::new(SecurityManager::new()).repl_text("x = 1");
        let uri = Uri::parse("repl:text").unwrap();
        let resolved = loader.read(&uri).unwrap();
        assert_eq!(resolved.text, "x = 1");
    }
}
