//! Project files: a module amending `pkl:Project`, read for evaluator settings and dependency
//! pinning (§6 "Project file").
//!
//! The project module itself is evaluated through the normal pipeline; this module only
//! models the settings shape the core reads back out of the evaluated object and the
//! companion `PklProject.deps.json` resolved-dependency record. It does not implement the
//! `pkl:Project` schema itself — that lives in the stdlib, outside this core.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `evaluatorSettings.{env, externalProperties, moduleCacheDir, allowedModules,
/// allowedResources, rootDir, timeout, http, modulePath}` read from a project module.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorSettingsOverride {
    pub env: BTreeMap<String, String>,
    pub external_properties: BTreeMap<String, String>,
    pub module_cache_dir: Option<PathBuf>,
    pub allowed_modules: Vec<String>,
    pub allowed_resources: Vec<String>,
    pub root_dir: Option<PathBuf>,
    pub timeout: Option<std::time::Duration>,
    pub module_path: Vec<PathBuf>,
}

/// One entry of a project's `dependencies` map: either a direct package reference or an
/// `import("../other/PklProject")` pointer, modeled here post-resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectDependency {
    Package { uri: String, checksum: Option<String> },
    LocalProject { path: PathBuf },
}

/// `PklProject.deps.json`: the resolved dependency graph written alongside a project file
/// (§6). `schemaVersion` plus, for each canonical base URI, whether it resolved locally or
/// remotely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedDependencies {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub resolved: BTreeMap<String, ResolvedDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedDependency {
    Local { path: String },
    Remote {
        uri: String,
        checksums: BTreeMap<String, String>,
    },
}

impl ResolvedDependencies {
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            resolved: BTreeMap::new(),
        }
    }
}

impl Default for ResolvedDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_dependencies_round_trip_through_json() {
        let mut deps = ResolvedDependencies::new();
        deps.resolved.insert(
            "package://example.com/birds@0".to_string(),
            ResolvedDependency::Remote {
                uri: "package://example.com/birds@0.5.0".to_string(),
                checksums: [("sha256".to_string(), "deadbeef".to_string())].into_iter().collect(),
            },
        );
        let json = serde_json::to_string(&deps).unwrap();
        let back: ResolvedDependencies = serde_json::from_str(&json).unwrap();
        assert_eq!(deps, back);
    }
}
