//! Translation of client paths into object-store requests and cache keys
//!
//! A request path is `{bucket}/{key...}`. The object key is sent to the store
//! verbatim, while the cache key is derived from a normalised form of it so
//! that `dir`, `dir/` and `dir/index.html` share one cache entry.

use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

/// Object key used when a request names only a bucket
pub const INDEX_DOCUMENT: &str = "index.html";

const INDEX_SUFFIX: &str = "/index.html";

/// Fixed-length identifier of a cached object (32 lowercase hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of the hex representation
    pub const LEN: usize = 32;

    /// Digest an already-normalised (bucket, key) pair
    pub fn digest(bucket: &str, normalized_key: &str) -> Self {
        let mut input = String::with_capacity(bucket.len() + normalized_key.len() + 1);
        input.push_str(bucket);
        input.push('/');
        input.push_str(normalized_key);
        CacheKey(format!("{:032x}", xxh3_128(input.as_bytes())))
    }

    /// Parse a cache key back from its hex form (e.g. a cache file name)
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| CacheKey(s.to_string()))
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

/// A client path split into its object-store coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub bucket: String,
    /// Literal object key to request from the store
    pub key: String,
    pub cache_key: CacheKey,
}

/// Split a client path into bucket and object key
///
/// Slashes are trimmed from both ends first. A path without a `/` names a
/// bucket root and resolves to its `index.html`. Returns `None` for an empty
/// path.
pub fn resolve_path(path: &str) -> Option<ResolvedPath> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let (bucket, key) = match trimmed.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (trimmed, INDEX_DOCUMENT),
    };

    Some(ResolvedPath {
        bucket: bucket.to_string(),
        key: key.to_string(),
        cache_key: cache_key(bucket, key),
    })
}

/// Normalise an object key for cache identity
///
/// Trailing slashes and trailing `/index.html` components are removed until
/// the key stops changing; a bare `index.html` normalises to the empty key.
pub fn normalize_key(key: &str) -> &str {
    let mut current = key;
    loop {
        let stripped = current.trim_end_matches('/');
        let stripped = if stripped == INDEX_DOCUMENT {
            ""
        } else {
            stripped.strip_suffix(INDEX_SUFFIX).unwrap_or(stripped)
        };
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Cache key for a (bucket, non-normalised key) pair
pub fn cache_key(bucket: &str, key: &str) -> CacheKey {
    CacheKey::digest(bucket, normalize_key(key))
}

/// Key to try once when the literal key does not exist
pub fn index_fallback_key(key: &str) -> String {
    format!("{}{}", key, INDEX_SUFFIX)
}
