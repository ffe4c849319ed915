//! Package-level result cache.
//!
//! The key covers every input that can change the woven output of a package. A hit
//! carries the modified file contents and the minimum language version, so the injector
//! can skip parsing altogether.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::injector::references::ReferenceMap;
use crate::version::GoVersion;

/// Version of this crate, part of every key.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash of all inputs. The list inputs are sorted here, so callers may pass them in
    /// any order.
    pub fn compute(
        tool_version: &str,
        import_path: &str,
        go_version: Option<GoVersion>,
        test_main: bool,
        source_hashes: &[String],
        aspect_fingerprints: &[String],
        import_paths: &[String],
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(tool_version.as_bytes());
        field(import_path.as_bytes());
        field(
            go_version
                .map(|v| v.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        field(&[test_main as u8]);
        for list in [source_hashes, aspect_fingerprints, import_paths] {
            let mut sorted: Vec<&String> = list.iter().collect();
            sorted.sort();
            field(&(sorted.len() as u64).to_le_bytes());
            for item in sorted {
                field(item.as_bytes());
            }
        }
        CacheKey(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub contents: String,
    pub references: ReferenceMap,
}

/// Everything one package injection produced. Files that were left untouched are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Keyed by original file path.
    pub files: BTreeMap<String, CachedFile>,
    pub go_version: Option<GoVersion>,
}

impl CacheEntry {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Key-value store the cache lives in. Implementations may be shared across threads.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;
    fn put(&self, key: &CacheKey, value: Vec<u8>);
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &CacheKey, value: Vec<u8>) {
        self.entries.insert(key.clone(), value);
    }
}
