//! Evaluator construction and the per-evaluator settings builder (§5, §6).
//!
//! Grounded on the teacher's `Runner`/`Executor` split in `run.rs`: a settings/builder phase
//! that validates configuration once, handing off to an execution phase that owns the heap
//! (here, the module table and interner) for the evaluator's lifetime. Unlike the teacher, an
//! `Evaluator` is not `Send`/serializable — it holds trait objects (`HttpClient`, `VmTracer`,
//! readers) supplied by the host, matching §5's "constructed per evaluator and then immutable"
//! rule for the HTTP client, allowed-URI matchers, environment snapshot, and property map.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::ObjectBodyNode;
use crate::error::{ErrorKind, PklError};
use crate::http::{HttpClient, RewritingHttpClient, UrlRewriteRule};
use crate::intern::Interner;
use crate::loader::package_cache::PackageCache;
use crate::loader::project::ResolvedDependencies;
use crate::loader::{ModuleLoader, ModuleReader, ResourceReader};
use crate::module::{Module, ModuleInfo, ModuleName, ModuleParent};
use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker};
use crate::security::SecurityManager;
use crate::tracer::{NullTracer, VmTracer};
use crate::uri::Uri;
use crate::value::{ObjectData, ObjectKind, Value};

/// Collects every host-configurable knob listed under "Host CLI/server" in `spec.md` §1 and
/// the project-file settings in §6, validated once at [`build`](EvaluatorSettings::build).
pub struct EvaluatorSettings {
    security: SecurityManager,
    module_path: Vec<PathBuf>,
    root_dir: Option<PathBuf>,
    resource_limits: ResourceLimits,
    env: AHashMap<String, String>,
    properties: AHashMap<String, String>,
    url_rewrites: Vec<UrlRewriteRule>,
    http: Option<Box<dyn HttpClient>>,
    package_cache_dir: Option<PathBuf>,
    module_readers: Vec<Box<dyn ModuleReader>>,
    resource_readers: Vec<Box<dyn ResourceReader>>,
    project_dependencies: Option<ResolvedDependencies>,
    tracer: Option<Box<dyn VmTracer>>,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorSettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            security: SecurityManager::new(),
            module_path: Vec::new(),
            root_dir: None,
            resource_limits: ResourceLimits::new(),
            env: AHashMap::new(),
            properties: AHashMap::new(),
            url_rewrites: Vec::new(),
            http: None,
            package_cache_dir: None,
            module_readers: Vec::new(),
            resource_readers: Vec::new(),
            project_dependencies: None,
            tracer: None,
        }
    }

    #[must_use]
    pub fn security(mut self, security: SecurityManager) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn module_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.module_path = dirs;
        self
    }

    #[must_use]
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn max_depth(mut self, limit: usize) -> Self {
        self.resource_limits = self.resource_limits.max_depth(limit);
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.resource_limits = self.resource_limits.timeout(duration);
        self
    }

    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn external_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn url_rewrite(mut self, rule: UrlRewriteRule) -> Self {
        self.url_rewrites.push(rule);
        self
    }

    #[must_use]
    pub fn http_client(mut self, client: Box<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    #[must_use]
    pub fn package_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn module_reader(mut self, reader: Box<dyn ModuleReader>) -> Self {
        self.module_readers.push(reader);
        self
    }

    #[must_use]
    pub fn resource_reader(mut self, reader: Box<dyn ResourceReader>) -> Self {
        self.resource_readers.push(reader);
        self
    }

    #[must_use]
    pub fn project_dependencies(mut self, deps: ResolvedDependencies) -> Self {
        self.project_dependencies = Some(deps);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Box<dyn VmTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Validates the collected settings and constructs an [`Evaluator`].
    ///
    /// # Errors
    /// Returns a [`crate::error::ErrorKind::Package`] error if a package cache directory was
    /// requested but no HTTP client was configured to populate it.
    pub fn build(self) -> Result<Evaluator, PklError> {
        let package_cache = match self.package_cache_dir {
            Some(dir) => {
                let http = self
                    .http
                    .ok_or_else(|| PklError::new(ErrorKind::Package, "package cache directory configured without an HTTP client"))?;
                let rewriting: Box<dyn HttpClient> = Box::new(RewritingHttpClient::new(HttpClientBox(http), self.url_rewrites.clone()));
                Some(PackageCache::new(dir, rewriting))
            }
            None => None,
        };

        let mut loader = ModuleLoader::new(self.security).module_path(self.module_path);
        if let Some(root) = self.root_dir {
            loader = loader.root_dir(root);
        }
        for reader in self.module_readers {
            loader = loader.with_module_reader(reader);
        }
        for reader in self.resource_readers {
            loader = loader.with_resource_reader(reader);
        }
        if let Some(cache) = package_cache {
            loader = loader.with_package_cache(cache);
        }

        let resources: Box<dyn ResourceTracker> = if self.resource_limits.timeout.is_some() || self.resource_limits.max_depth.is_some() {
            Box::new(LimitedTracker::new(self.resource_limits))
        } else {
            Box::new(NoLimitTracker)
        };

        Ok(Evaluator {
            loader,
            interner: Interner::new(),
            modules: IndexMap::new(),
            tracer: self.tracer.unwrap_or_else(|| Box::new(NullTracer)),
            resources,
            env: self.env,
            properties: self.properties,
            project_dependencies: self.project_dependencies,
        })
    }
}

/// Adapts an owned trait object back into `HttpClient` so [`RewritingHttpClient`] (which is
/// generic over a concrete client type) can wrap it.
#[derive(Debug)]
struct HttpClientBox(Box<dyn HttpClient>);

impl HttpClient for HttpClientBox {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, PklError> {
        self.0.get(url, headers)
    }
}

/// A single-threaded evaluation session (§5: "single worker per evaluator"). Not `Send` — it
/// holds trait objects the host is not expected to share across threads.
pub struct Evaluator {
    loader: ModuleLoader,
    interner: Interner,
    modules: IndexMap<String, Rc<Module>>,
    tracer: Box<dyn VmTracer>,
    resources: Box<dyn ResourceTracker>,
    env: AHashMap<String, String>,
    properties: AHashMap<String, String>,
    project_dependencies: Option<ResolvedDependencies>,
}

impl Evaluator {
    #[must_use]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    #[must_use]
    pub fn interner_mut(&mut self) -> &mut Interner {
        &mut self.interner
    }

    #[must_use]
    pub fn env(&self) -> &AHashMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn external_properties(&self) -> &AHashMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn project_dependencies(&self) -> Option<&ResolvedDependencies> {
        self.project_dependencies.as_ref()
    }

    /// Resolves an import spec against an optional referrer module, per §4.1.
    pub fn resolve_import(&self, referrer: Option<&Uri>, spec: &str) -> Result<Uri, PklError> {
        self.loader.resolve(referrer, spec)
    }

    /// Already-loaded module for `resolved_uri`, if any (§3 "one `Module` per `resolvedKey`").
    #[must_use]
    pub fn loaded_module(&self, resolved_uri: &str) -> Option<&Rc<Module>> {
        self.modules.get(resolved_uri)
    }

    /// Builds and caches a module from its already-lowered IR body.
    ///
    /// The parser front-end that turns source text into `body` is out of scope for this crate
    /// (§1); hosts call this once they have an `ObjectBodyNode` for the module's top level,
    /// typically right after reading it with [`Self::resolve_import`] and a
    /// [`crate::loader::ModuleLoader::read`].
    pub fn evaluate_module(
        &mut self,
        resolved_uri: Uri,
        text: String,
        body: &ObjectBodyNode,
        parent: ModuleParent,
    ) -> Result<Rc<Module>, PklError> {
        let key = resolved_uri.to_string();
        if let Some(existing) = self.modules.get(&key) {
            return Ok(existing.clone());
        }

        let name = Module::infer_name_from_uri(&resolved_uri);
        let parent_object = match &parent {
            ModuleParent::Amends(parent_uri) | ModuleParent::Extends(parent_uri) => {
                let parent_key = parent_uri.to_string();
                let parent_module = self.modules.get(&parent_key).ok_or_else(|| {
                    PklError::new(
                        ErrorKind::NameResolution,
                        format!("parent module '{parent_key}' must be evaluated before its child '{key}'"),
                    )
                })?;
                Some(parent_module.object.clone())
            }
            ModuleParent::None => None,
        };

        let mut ctx = crate::eval::EvalContext {
            resources: self.resources.as_mut(),
            tracer: self.tracer.as_mut(),
            interner: &self.interner,
            depth: 0,
        };
        let root = match &parent_object {
            Some(parent) => parent.clone(),
            None => ObjectData::new_root(ObjectKind::Dynamic, Some(name.clone())),
        };
        let value = crate::eval::build_object(ObjectKind::Dynamic, parent_object.as_ref(), Some(&root), body, &mut ctx)?;
        let Value::Object(object) = value else {
            return Err(PklError::bug("module body did not evaluate to an object"));
        };

        let module = Rc::new(Module {
            module_key: resolved_uri.clone(),
            resolved_uri,
            text,
            info: ModuleInfo {
                name: ModuleName::InferredFromUri(name),
                parent,
                doc_ranges: Vec::new(),
            },
            object,
        });
        self.modules.insert(key, module.clone());
        Ok(module)
    }

    /// Reads a resource URI (§6 "read()"), serving `env:`/`prop:` from this evaluator's own
    /// snapshot maps and delegating every other scheme to the module loader's registered
    /// resource readers.
    pub fn read_resource(&self, uri: &Uri) -> Result<Vec<u8>, PklError> {
        match uri.scheme() {
            Some("env") => self
                .env
                .get(uri.path.trim_start_matches('/'))
                .map(|v| v.clone().into_bytes())
                .ok_or_else(|| PklError::new(ErrorKind::Io, format!("no environment variable '{}'", uri.path))),
            Some("prop") => self
                .properties
                .get(uri.path.trim_start_matches('/'))
                .map(|v| v.clone().into_bytes())
                .ok_or_else(|| PklError::new(ErrorKind::Io, format!("no external property '{}'", uri.path))),
            _ => self.loader.read_resource(uri),
        }
    }

    /// Forces a single property on an already-evaluated module's top-level object (§5 "force").
    pub fn force(&mut self, module: &Module, key: &crate::value::MemberKey) -> Result<Value, PklError> {
        let mut ctx = crate::eval::EvalContext {
            resources: self.resources.as_mut(),
            tracer: self.tracer.as_mut(),
            interner: &self.interner,
            depth: 0,
        };
        crate::eval::force(&module.object, key, &mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_build_without_a_package_cache() {
        let evaluator = EvaluatorSettings::new().build();
        assert!(evaluator.is_ok());
    }

    #[test]
    fn package_cache_dir_without_an_http_client_is_rejected() {
        let result = EvaluatorSettings::new().package_cache_dir("/tmp/pkl-cache").build();
        assert!(result.is_err());
    }

    #[test]
    fn env_resource_reads_come_from_the_configured_snapshot() {
        let evaluator = EvaluatorSettings::new().env_var("HOME", "/home/pkl").build().unwrap();
        let uri = Uri::parse("env:HOME").unwrap();
        let bytes = evaluator.read_resource(&uri).unwrap();
        assert_eq!(bytes, b"/home/pkl");
    }

    #[test]
    fn evaluating_the_same_uri_twice_returns_the_cached_module() {
        let mut evaluator = EvaluatorSettings::new().build().unwrap();
        let uri = Uri::parse("file:///a.pkl").unwrap();
        let body = ObjectBodyNode::PropertiesOnly { properties: Vec::new() };
        let first = evaluator.evaluate_module(uri.clone(), "x".into(), &body, ModuleParent::None).unwrap();
        let second = evaluator.evaluate_module(uri, "x".into(), &body, ModuleParent::None).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn amending_an_already_loaded_module_inherits_its_members() {
        let mut evaluator = EvaluatorSettings::new().build().unwrap();
        let name_id = evaluator.interner_mut().intern("name");

        let parent_uri = Uri::parse("file:///base.pkl").unwrap();
        let parent_body = ObjectBodyNode::PropertiesOnly {
            properties: vec![crate::ast::Member {
                range: crate::error::CodeRange::default(),
                modifiers: crate::ast::Modifiers::empty(),
                name: name_id,
                qualified_name: "name".to_string(),
                type_annotation: None,
                body: crate::ast::MemberBody::Constant(crate::ast::Literal::Int(1)),
            }],
        };
        let parent = evaluator.evaluate_module(parent_uri.clone(), "name = 1".into(), &parent_body, ModuleParent::None).unwrap();

        let child_uri = Uri::parse("file:///child.pkl").unwrap();
        let child_body = ObjectBodyNode::PropertiesOnly { properties: Vec::new() };
        let child = evaluator
            .evaluate_module(child_uri, "amends \"base.pkl\"".into(), &child_body, ModuleParent::Amends(parent_uri))
            .unwrap();

        let value = evaluator.force(&child, &crate::value::MemberKey::Property(name_id)).unwrap();
        assert!(matches!(value, Value::Int(1)));
        let _ = parent;
    }

    #[test]
    fn amending_an_unloaded_parent_is_rejected() {
        let mut evaluator = EvaluatorSettings::new().build().unwrap();
        let child_uri = Uri::parse("file:///child.pkl").unwrap();
        let parent_uri = Uri::parse("file:///base.pkl").unwrap();
        let body = ObjectBodyNode::PropertiesOnly { properties: Vec::new() };
        let err = evaluator
            .evaluate_module(child_uri, "amends \"base.pkl\"".into(), &body, ModuleParent::Amends(parent_uri))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameResolution);
    }
}
