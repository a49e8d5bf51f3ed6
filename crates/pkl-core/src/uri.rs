//! URIs: the identifiers every module, resource, and package is addressed by (§3 "URIs").
//!
//! Kept deliberately small and hand-rolled rather than pulling in a general URI crate: Pkl
//! only ever sees a handful of schemes (`file`, `modulepath`, `https`, `package`,
//! `projectpackage`, `repl`, `pkl`, or a host-registered custom scheme) and the resolution
//! rules (§4.1) are narrower than RFC 3986 in general.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, PklError};

/// An absolute or relative hierarchical URI, split into the pieces the loader cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: String,
    pub fragment: Option<String>,
}

impl Uri {
    /// Parses `text` into scheme/authority/path/fragment without validating the scheme
    /// against any allow-list — that happens at the loader boundary (§4.1).
    pub fn parse(text: &str) -> Result<Self, PklError> {
        let (rest, fragment) = match text.split_once('#') {
            Some((head, frag)) => (head, Some(frag.to_string())),
            None => (text, None),
        };

        let (scheme, rest) = match rest.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest),
            None => match rest.split_once(':') {
                // `repl:text` and similar non-hierarchical schemes have no `//` authority.
                Some((scheme, rest)) if !rest.starts_with('/') || is_windows_drive(rest) => {
                    (Some(scheme.to_string()), rest)
                }
                Some((scheme, rest)) => (Some(scheme.to_string()), rest),
                None => (None, rest),
            },
        };

        let (authority, path) = match &scheme {
            Some(s) if s == "file" || s == "https" || s == "http" || s == "package" || s == "projectpackage" => {
                if let Some(stripped) = rest.strip_prefix('/') {
                    if let Some((auth, path)) = stripped.split_once('/') {
                        (Some(auth.to_string()), format!("/{path}"))
                    } else {
                        (Some(stripped.to_string()), String::new())
                    }
                } else {
                    (None, rest.to_string())
                }
            }
            _ => (None, rest.to_string()),
        };

        if scheme.is_none() && rest.is_empty() {
            return Err(PklError::new(ErrorKind::Parse, "empty module URI"));
        }

        Ok(Self {
            scheme,
            authority,
            path,
            fragment,
        })
    }

    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    #[must_use]
    pub fn is_relative(&self) -> bool {
        self.scheme.is_none()
    }

    /// Resolves `self` (taken as relative) against `referrer`, per RFC 3986 relative-reference
    /// rules restricted to the path component (Pkl URIs never carry a query string).
    #[must_use]
    pub fn resolve_against(&self, referrer: &Self) -> Self {
        if !self.is_relative() {
            return self.clone();
        }
        if self.path.starts_with('/') {
            return Self {
                scheme: referrer.scheme.clone(),
                authority: referrer.authority.clone(),
                path: self.path.clone(),
                fragment: self.fragment.clone(),
            };
        }
        let base_dir = match referrer.path.rfind('/') {
            Some(idx) => &referrer.path[..=idx],
            None => "",
        };
        let joined = normalize_path(&format!("{base_dir}{}", self.path));
        Self {
            scheme: referrer.scheme.clone(),
            authority: referrer.authority.clone(),
            path: joined,
            fragment: self.fragment.clone(),
        }
    }

    #[must_use]
    pub fn to_file_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}:")?;
            if self.authority.is_some() || self.path.starts_with('/') {
                write!(f, "//")?;
            }
        }
        if let Some(authority) = &self.authority {
            write!(f, "{authority}")?;
        }
        write!(f, "{}", self.path)?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

fn is_windows_drive(rest: &str) -> bool {
    rest.len() >= 2 && rest.as_bytes()[0].is_ascii_alphabetic() && rest.as_bytes()[1] == b'\\'
}

/// Collapses `.` and `..` segments in a `/`-joined path, without touching the filesystem.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Tries `".../x"`-style upward search: `../x`, `../../x`, ... until a candidate exists or the
/// module root is reached (§4.1).
///
/// `exists` is injected so the loader's real filesystem check can be swapped for a test double.
pub fn upward_search(
    referrer_dir: &Path,
    relative_tail: &str,
    root: Option<&Path>,
    mut exists: impl FnMut(&Path) -> bool,
) -> Option<PathBuf> {
    let mut dir = referrer_dir.to_path_buf();
    loop {
        let candidate = dir.join(relative_tail);
        if exists(&candidate) {
            return Some(candidate);
        }
        if let Some(root) = root
            && dir == *root
        {
            return None;
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent.to_path_buf(),
            _ => return None,
        }
    }
}

/// A `package://` or `projectpackage://` URI (§3 "URIs").
///
/// `package://<host>/<name>@<ver>[::sha256:<hex>][#<fragment>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUri {
    pub host: String,
    pub path: String,
    pub name: String,
    pub version: semver_lite::Version,
    pub checksum: Option<String>,
    pub fragment: Option<String>,
    pub is_project_package: bool,
}

impl PackageUri {
    pub fn parse(text: &str) -> Result<Self, PklError> {
        let is_project_package = text.starts_with("projectpackage://");
        let rest = text
            .strip_prefix("package://")
            .or_else(|| text.strip_prefix("projectpackage://"))
            .ok_or_else(|| PklError::new(ErrorKind::Parse, format!("not a package URI: {text}")))?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((head, frag)) => (head, Some(frag.to_string())),
            None => (rest, None),
        };

        let (rest, checksum) = match rest.split_once("::sha256:") {
            Some((head, hex)) => (head, Some(hex.to_string())),
            None => (rest, None),
        };

        let (host, path) = rest
            .split_once('/')
            .ok_or_else(|| PklError::new(ErrorKind::Parse, format!("package URI missing path: {text}")))?;

        let (name_path, version_str) = path
            .rsplit_once('@')
            .ok_or_else(|| PklError::new(ErrorKind::Parse, format!("package URI missing version: {text}")))?;

        let version = semver_lite::Version::parse(version_str)
            .ok_or_else(|| PklError::new(ErrorKind::Parse, format!("invalid semver '{version_str}' in {text}")))?;

        let name = name_path.rsplit('/').next().unwrap_or(name_path).to_string();

        Ok(Self {
            host: host.to_string(),
            path: name_path.to_string(),
            name,
            version,
            checksum,
            fragment,
            is_project_package,
        })
    }

    /// The canonical form: scheme, host, path-without-version, and major version only (§3).
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("package://{}/{}@{}", self.host, self.path, self.version.major)
    }
}

/// A tiny semver subset: `major.minor.patch` with no pre-release/build metadata parsing
/// beyond what the package cache's directory-naming scheme needs.
pub mod semver_lite {
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Version {
        pub major: u64,
        pub minor: u64,
        pub patch: u64,
    }

    impl Version {
        #[must_use]
        pub fn parse(text: &str) -> Option<Self> {
            let mut parts = text.split('.');
            let major = parts.next()?.parse().ok()?;
            let minor = parts.next().unwrap_or("0").parse().ok()?;
            let patch = parts.next().unwrap_or("0").parse().ok()?;
            Some(Self { major, minor, patch })
        }
    }

    impl fmt::Display for Version {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}
