//! The on-disk package cache (§4.2, §6 "Package cache on disk").
//!
//! Grounded on elba's `package::mod` (`PackageId`, `Checksum`, `Resolution` — `other_examples/`)
//! for the shape of a checksummed, versioned package identity, adapted from elba's
//! git/dir/tar/index resolution sources down to Pkl's single `package:` HTTPS+ZIP source.
//! The atomic stage-then-rename unpack step and the in-flight dedup map are this crate's own,
//! since neither example repo models concurrent package fetches.

use std::collections::HashSet;
use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, PklError};
use crate::http::HttpClient;
use crate::uri::PackageUri;

const SCHEMA_VERSION: &str = "1";

/// `{name, packageUri, version, packageZipUrl, packageZipChecksums.sha256, dependencies,
/// authors, annotations}` — the metadata JSON document fetched per package (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    #[serde(rename = "packageUri")]
    pub package_uri: String,
    pub version: String,
    #[serde(rename = "packageZipUrl")]
    pub package_zip_url: String,
    #[serde(rename = "packageZipChecksums")]
    pub package_zip_checksums: ZipChecksums,
    #[serde(default)]
    pub dependencies: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZipChecksums {
    pub sha256: String,
}

/// A content-addressed, checksum-verified store of unpacked packages, shared across
/// evaluators within a process and across processes via rename-based atomicity (§5).
///
/// Concurrent callers fetching the same `(canonical, version)` do not race each other's HTTP
/// calls: the first caller to see a key absent from `in_flight` becomes the fetcher and the
/// rest wait on `in_flight_done` until it clears the key, then re-check disk (§4.2 step 4).
#[derive(Debug)]
pub struct PackageCache {
    root: PathBuf,
    http: Box<dyn HttpClient>,
    in_flight: Mutex<HashSet<String>>,
    in_flight_done: Condvar,
}

impl PackageCache {
    #[must_use]
    pub fn new(root: PathBuf, http: Box<dyn HttpClient>) -> Self {
        Self {
            root,
            http,
            in_flight: Mutex::new(HashSet::new()),
            in_flight_done: Condvar::new(),
        }
    }

    /// Directory for a package's major-version line: `<root>/package-<schema>/<host>/<name>@<version>`.
    fn package_dir(&self, uri: &PackageUri) -> PathBuf {
        self.root
            .join(format!("package-{SCHEMA_VERSION}"))
            .join(&uri.host)
            .join(format!("{}@{}", uri.name, uri.version))
    }

    /// Ensures the package named by `uri` is present on disk, fetching and verifying it if
    /// necessary, and returns the directory containing its unpacked contents (§4.2 algorithm).
    pub fn ensure_present(&self, uri: &PackageUri) -> Result<PathBuf, PklError> {
        let dir = self.package_dir(uri);
        let contents_dir = dir.join("contents");
        if contents_dir.is_dir() {
            return Ok(contents_dir);
        }

        let key = uri.canonical();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            loop {
                if in_flight.insert(key.clone()) {
                    break;
                }
                in_flight = self.in_flight_done.wait(in_flight).unwrap();
                if contents_dir.is_dir() {
                    return Ok(contents_dir);
                }
                // the previous fetcher cleared the key without populating `contents_dir` (it
                // failed); loop back and try to become the fetcher ourselves.
            }
        }
        let result = self.fetch_and_unpack(uri, &dir);
        self.in_flight.lock().unwrap().remove(&key);
        self.in_flight_done.notify_all();
        result.map(|()| contents_dir)
    }

    fn fetch_and_unpack(&self, uri: &PackageUri, dir: &Path) -> Result<(), PklError> {
        let metadata_url = format!("{}.json", uri.canonical().replace("package://", "https://"));
        let metadata_bytes = self.http.get(&metadata_url, &[])?;

        if let Some(expected) = &uri.checksum {
            let actual = hex_sha256(&metadata_bytes);
            if &actual != expected {
                return Err(PklError::new(
                    ErrorKind::Package,
                    format!("metadata checksum mismatch for '{}': expected {expected}, computed {actual}", uri.canonical()),
                ));
            }
        }

        let metadata: PackageMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|e| PklError::new(ErrorKind::Package, format!("invalid package metadata: {e}")))?;

        let zip_bytes = self.http.get(&metadata.package_zip_url, &[])?;
        let actual_zip_hash = hex_sha256(&zip_bytes);
        if actual_zip_hash != metadata.package_zip_checksums.sha256 {
            return Err(PklError::new(
                ErrorKind::Package,
                format!(
                    "zip checksum mismatch for '{}' ({}): expected {}, computed {actual_zip_hash}",
                    metadata.name, metadata.package_zip_url, metadata.package_zip_checksums.sha256
                ),
            ));
        }

        let staging = self.root.join(format!(".staging-{}", hex_sha256(uri.canonical().as_bytes())));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(io_err)?;
        }
        fs::create_dir_all(&staging).map_err(io_err)?;
        unpack_zip(&zip_bytes, &staging)?;

        fs::create_dir_all(dir.parent().unwrap_or(dir)).map_err(io_err)?;
        let contents_dir = dir.join("contents");
        if contents_dir.exists() {
            // another process won the race; our staging copy is redundant
            fs::remove_dir_all(&staging).ok();
        } else {
            fs::rename(&staging, &contents_dir).map_err(io_err)?;
        }

        let metadata_path = dir.join(format!("{}@{}.json", uri.name, uri.version));
        fs::write(&metadata_path, &metadata_bytes).map_err(io_err)?;
        fs::write(dir.join(format!("{}@{}.sha256", uri.name, uri.version)), hex_sha256(&metadata_bytes)).map_err(io_err)?;
        fs::write(dir.join(format!("{}@{}.zip.sha256", uri.name, uri.version)), &actual_zip_hash).map_err(io_err)?;

        Ok(())
    }
}

fn io_err(e: std::io::Error) -> PklError {
    PklError::new(ErrorKind::Io, e.to_string())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn unpack_zip(bytes: &[u8], dest: &Path) -> Result<(), PklError> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| PklError::new(ErrorKind::Package, format!("invalid zip archive: {e}")))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PklError::new(ErrorKind::Package, format!("corrupt zip entry: {e}")))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(PklError::new(ErrorKind::Package, "zip entry has an unsafe path"));
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(io_err)?;
        fs::write(&out_path, buf).map_err(io_err)?;
    }
    Ok(())
}
