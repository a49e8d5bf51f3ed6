//! End-to-end package cache scenarios: fetch/verify/unpack, and the checksum-mismatch
//! rejection path, through the crate's public API (no `pkl_core::loader::package_cache`
//! internals).

use std::fs;
use std::io::Write as _;

use pkl_core::{HttpClient, PackageCache, PackageUri, PklError};

#[derive(Debug)]
struct FakeHttp {
    metadata: Vec<u8>,
    zip: Vec<u8>,
}

impl HttpClient for FakeHttp {
    fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<Vec<u8>, PklError> {
        if url.ends_with(".json") {
            Ok(self.metadata.clone())
        } else {
            Ok(self.zip.clone())
        }
    }
}

fn make_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn a_fresh_package_is_fetched_verified_and_unpacked() {
    let dir = tempfile::tempdir().unwrap();
    let zip_bytes = make_zip(&[("mod.pkl", "name = \"Pigeon\"")]);
    let zip_hash = sha256_hex(&zip_bytes);
    let metadata = serde_json::json!({
        "name": "birds",
        "packageUri": "package://example.com/birds@1.2.0",
        "version": "1.2.0",
        "packageZipUrl": "https://example.com/birds@1.2.0.zip",
        "packageZipChecksums": { "sha256": zip_hash },
    });

    let cache = PackageCache::new(
        dir.path().to_path_buf(),
        Box::new(FakeHttp {
            metadata: serde_json::to_vec(&metadata).unwrap(),
            zip: zip_bytes,
        }),
    );
    let uri = PackageUri::parse("package://example.com/birds@1.2.0").unwrap();
    let contents_dir = cache.ensure_present(&uri).unwrap();
    let text = fs::read_to_string(contents_dir.join("mod.pkl")).unwrap();
    assert_eq!(text, "name = \"Pigeon\"");

    // A second request for the same package must be served from disk, not refetched; the
    // fake client would return the same bytes either way, so assert on the directory path
    // being stable instead.
    let contents_dir_again = cache.ensure_present(&uri).unwrap();
    assert_eq!(contents_dir, contents_dir_again);
}

#[test]
fn checksum_mismatch_leaves_no_trace_in_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let zip_bytes = make_zip(&[("mod.pkl", "name = \"Pigeon\"")]);
    let metadata = serde_json::json!({
        "name": "birds",
        "packageUri": "package://example.com/birds@1.2.0",
        "version": "1.2.0",
        "packageZipUrl": "https://example.com/birds@1.2.0.zip",
        "packageZipChecksums": { "sha256": "f".repeat(64) },
    });

    let cache = PackageCache::new(
        dir.path().to_path_buf(),
        Box::new(FakeHttp {
            metadata: serde_json::to_vec(&metadata).unwrap(),
            zip: zip_bytes,
        }),
    );
    let uri = PackageUri::parse("package://example.com/birds@1.2.0").unwrap();
    let result = cache.ensure_present(&uri);
    assert!(result.is_err());

    let mut walked = Vec::new();
    for entry in walkdir(dir.path()) {
        walked.push(entry);
    }
    assert!(walked.iter().all(|p| !p.ends_with("contents")), "no contents/ dir should have been staged: {walked:?}");
}

fn walkdir(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    out
}
