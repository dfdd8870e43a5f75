//! Content-addressed cache of generation results.
//!
//! [`GenerationCache`] maps the normalized parameters of a generation
//! (`{model, messages, max_tokens, temperature}`) to the ordered token list a
//! backend previously produced for them. The store is idempotent: the same key
//! always maps to the same token sequence for the lifetime of the store, and a
//! forced regeneration overwrites the entry rather than appending.
//!
//! # Key derivation
//!
//! The key is a SHA-256 hex digest computed over the parameter map's entries in
//! ascending key order. For every entry the hasher is updated with the key
//! bytes followed by the value bytes: strings verbatim, numbers in their
//! shortest decimal form, and nested structures as canonical JSON with
//! recursively sorted object keys. Re-ordering the input map or re-ordering
//! keys inside nested objects therefore never changes the key.
//!
//! # Disk Format
//!
//! One JSON file per key under the cache directory:
//!
//! ```text
//! llm_cache/
//!   ├─ 6b86b273ff34fce1....json   {"key":"6b86...","created_at":"2025-07-01T12:00:00Z","tokens":["Hel","lo"]}
//!   └─ d4735e3a265e16ee....json
//! ```
//!
//! Writes replace the whole file, so concurrent writers for the same key
//! resolve to last-writer-wins. Two in-flight identical requests are *not*
//! deduplicated — both generate and both write; callers needing single-flight
//! semantics must add it externally.
//!
//! # Example
//!
//! ```rust,no_run
//! use multiprompt::GenerationCache;
//!
//! # fn main() -> Result<(), multiprompt::CacheError> {
//! let cache = GenerationCache::open("llm_cache")?;
//!
//! let key = GenerationCache::key_for(&serde_json::json!({
//!     "model": "gpt-4o",
//!     "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
//!     "max_tokens": 4096,
//!     "temperature": 0.7,
//! }));
//!
//! cache.put(&key, &["Hel".to_string(), "lo".to_string()])?;
//! assert_eq!(cache.get(&key)?.unwrap().concat(), "Hello");
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::multiprompt::token_source::TokenStream;

/// Upper bound of the per-token replay jitter, in microseconds (10 ms).
const REPLAY_JITTER_MICROS: u64 = 10_000;

/// Errors raised by the cache store.
///
/// A read error is treated as a forced miss by the generation path; a write
/// error is logged there and never fails a round.
#[derive(Debug)]
pub enum CacheError {
    /// The underlying file could not be read or written.
    Io {
        /// Path of the entry file (or cache directory).
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// An entry file exists but does not parse.
    Corrupt {
        /// The key whose entry is damaged.
        key: String,
        /// Parser detail.
        detail: String,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io { path, source } => {
                write!(f, "cache I/O error at {}: {}", path.display(), source)
            }
            CacheError::Corrupt { key, detail } => {
                write!(f, "corrupt cache entry for key {}: {}", key, detail)
            }
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Io { source, .. } => Some(source),
            CacheError::Corrupt { .. } => None,
        }
    }
}

/// One persisted generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// The content-address this entry was stored under.
    key: String,
    /// When the entry was (last) written.
    created_at: DateTime<Utc>,
    /// The ordered tokens the backend emitted.
    tokens: Vec<String>,
}

/// A content-addressed, disk-backed store of `key → token list`.
pub struct GenerationCache {
    dir: PathBuf,
}

impl GenerationCache {
    /// Open (creating if necessary) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(GenerationCache { dir })
    }

    /// Directory the cache stores its entries in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive the content address of a parameter map.
    ///
    /// Stable under re-ordering of the map's keys and under different
    /// in-memory representations of equal nested structures. Non-object inputs
    /// hash as a single value.
    pub fn key_for(params: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        match params {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    hasher.update(key.as_bytes());
                    hasher.update(value_bytes(&map[key]));
                }
            }
            other => hasher.update(value_bytes(other)),
        }
        format!("{:x}", hasher.finalize())
    }

    /// Look up the tokens stored under `key`; `Ok(None)` on a miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        let path = self.entry_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let entry: CacheEntry = serde_json::from_str(&raw).map_err(|err| CacheError::Corrupt {
            key: key.to_string(),
            detail: err.to_string(),
        })?;
        Ok(Some(entry.tokens))
    }

    /// Store `tokens` under `key`, replacing any existing entry.
    pub fn put(&self, key: &str, tokens: &[String]) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            created_at: Utc::now(),
            tokens: tokens.to_vec(),
        };
        let raw = serde_json::to_string(&entry).map_err(|err| CacheError::Corrupt {
            key: key.to_string(),
            detail: err.to_string(),
        })?;
        let path = self.entry_path(key);
        fs::write(&path, raw).map_err(|source| CacheError::Io { path, source })
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    /// Remove the entry for `key`, if present.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Re-emit stored tokens with the same stream interface as a live
    /// generation.
    ///
    /// Each token is delayed by up to 10 ms of random jitter so that consumers
    /// keep their streaming pacing without the latency of a real call.
    pub fn replay(tokens: Vec<String>) -> TokenStream {
        Box::pin(futures_util::stream::unfold(
            tokens.into_iter(),
            |mut tokens| async move {
                let token = tokens.next()?;
                let jitter = rand::thread_rng().gen_range(0..=REPLAY_JITTER_MICROS);
                tokio::time::sleep(Duration::from_micros(jitter)).await;
                Some((Ok(token), tokens))
            },
        ))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

/// The bytes a value contributes to the hash: strings verbatim, scalars in
/// their canonical decimal form, nested structures as canonical JSON.
fn value_bytes(value: &serde_json::Value) -> Vec<u8> {
    match value {
        serde_json::Value::String(s) => s.as_bytes().to_vec(),
        serde_json::Value::Number(n) => n.to_string().into_bytes(),
        serde_json::Value::Bool(b) => b.to_string().into_bytes(),
        serde_json::Value::Null => b"null".to_vec(),
        nested => canonical_json(nested).into_bytes(),
    }
}

/// Serialize with recursively sorted object keys, independent of the map's
/// in-memory ordering.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String((*key).clone()),
                        canonical_json(&map[*key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_stable_under_key_reordering() {
        let a = json!({"model": "gpt-4o", "temperature": 0.7, "max_tokens": 4096});
        let b = json!({"max_tokens": 4096, "model": "gpt-4o", "temperature": 0.7});
        assert_eq!(GenerationCache::key_for(&a), GenerationCache::key_for(&b));
    }

    #[test]
    fn key_is_stable_under_nested_reordering() {
        let a = json!({"messages": [{"role": "user", "content": "hi"}]});
        let b = json!({"messages": [{"content": "hi", "role": "user"}]});
        assert_eq!(GenerationCache::key_for(&a), GenerationCache::key_for(&b));
    }

    #[test]
    fn distinct_params_get_distinct_keys() {
        let a = json!({"model": "gpt-4o", "temperature": 0.7});
        let b = json!({"model": "gpt-4o", "temperature": 0.8});
        assert_ne!(GenerationCache::key_for(&a), GenerationCache::key_for(&b));
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
