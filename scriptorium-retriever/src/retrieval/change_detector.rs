//! Content-hash based change detection over a corpus directory.
//!
//! A scan walks the corpus root, hashes every matched file with blake3 and
//! returns a `path → hash` mapping keyed by root-relative, `/`-separated paths.
//! Two mappings are compared with [`diff`] to produce a [`ChangeSet`].
//!
//! Scans never fail because of a single file: unreadable entries are logged and
//! left out of the mapping, and a missing root is simply an empty corpus.

use super::chunking_strategy::FileMatcher;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Default read buffer for streamed hashing.
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// Mapping of root-relative path to content hash.
pub type ContentMap = BTreeMap<String, String>;

/// Paths that differ between two scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Paths that need (re)indexing: `added ∪ modified`.
    pub fn to_index(&self) -> BTreeSet<String> {
        self.added.union(&self.modified).cloned().collect()
    }
}

/// Compare two scans.
pub fn diff(old: &ContentMap, new: &ContentMap) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (path, hash) in new {
        match old.get(path) {
            None => {
                changes.added.insert(path.clone());
            }
            Some(previous) if previous != hash => {
                changes.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.deleted.insert(path.clone());
        }
    }
    changes
}

/// Hex blake3 digest of an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hex blake3 digest of a file, read through a buffer of `buffer_size` bytes.
pub fn hash_file(path: &Path, buffer_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash, size and modification time of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub hash: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub mtime: f64,
}

impl Fingerprint {
    pub fn of(path: &Path, buffer_size: usize) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Self {
            hash: hash_file(path, buffer_size)?,
            size: metadata.len(),
            mtime,
        })
    }
}

/// Render a root-relative path with `/` separators.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Scans one corpus root.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    root: PathBuf,
    matcher: FileMatcher,
    buffer_size: usize,
}

impl ChangeDetector {
    pub fn new<P: Into<PathBuf>>(root: P, matcher: FileMatcher) -> Self {
        Self {
            root: root.into(),
            matcher,
            buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn matcher(&self) -> &FileMatcher {
        &self.matcher
    }

    /// Absolute path for a root-relative key.
    pub fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Every matched file under the root as `(key, absolute path)`, sorted by key.
    pub fn walk(&self) -> Vec<(String, PathBuf)> {
        if !self.root.is_dir() {
            tracing::debug!("Corpus root {} does not exist", self.root.display());
            return Vec::new();
        }

        let matcher = self.matcher.clone();
        let walker = ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| matcher.should_descend(name))
                    .unwrap_or(false)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", self.root.display(), err);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(key) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            if self.matcher.should_index_file(Path::new(&key)) {
                files.push((key, entry.into_path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }

    /// Hash every matched file.
    pub fn scan(&self) -> ContentMap {
        self.scan_fingerprints()
            .into_iter()
            .map(|(key, fp)| (key, fp.hash))
            .collect()
    }

    /// Hash, size and mtime of every matched file.
    pub fn scan_fingerprints(&self) -> BTreeMap<String, Fingerprint> {
        let mut result = BTreeMap::new();
        for (key, path) in self.walk() {
            match Fingerprint::of(&path, self.buffer_size) {
                Ok(fp) => {
                    result.insert(key, fp);
                }
                Err(err) => {
                    tracing::warn!("Skipping unreadable file {}: {}", path.display(), err);
                }
            }
        }
        tracing::debug!("Scanned {} files under {}", result.len(), self.root.display());
        result
    }

    /// [`scan`](Self::scan) on the blocking thread pool.
    pub async fn scan_async(&self) -> Result<ContentMap> {
        let detector = self.clone();
        Ok(tokio::task::spawn_blocking(move || detector.scan()).await?)
    }

    /// [`scan_fingerprints`](Self::scan_fingerprints) on the blocking thread pool.
    pub async fn scan_fingerprints_async(&self) -> Result<BTreeMap<String, Fingerprint>> {
        let detector = self.clone();
        Ok(tokio::task::spawn_blocking(move || detector.scan_fingerprints()).await?)
    }
}
