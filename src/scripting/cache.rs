//! Compiled script cache, keyed by digest.

use super::ast::Chunk;
use super::compile;
use crate::error::CommandError;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Lowercase hex SHA-256 of a script body.
pub fn digest(source: &[u8]) -> String {
    hex::encode(Sha256::digest(source))
}

/// A cached script: its source and the compiled tree.
#[derive(Debug)]
pub struct Script {
    pub source: Bytes,
    pub chunk: Arc<Chunk>,
}

/// Scripts loaded by `SCRIPT LOAD` or run by `EVAL`.
#[derive(Debug, Default)]
pub struct ScriptCache {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and caches a script, returning its digest.
    ///
    /// Nothing is cached when compilation fails.
    pub fn load(&self, source: Bytes) -> Result<(String, Arc<Script>), CommandError> {
        let sha = digest(&source);
        if let Some(script) = self.get(&sha) {
            return Ok((sha, script));
        }

        let chunk = compile(&source)?;
        let script = Arc::new(Script { source, chunk });
        let mut scripts = self.scripts.write().unwrap_or_else(PoisonError::into_inner);
        let script = Arc::clone(scripts.entry(sha.clone()).or_insert(script));
        debug!(sha = %sha, "Cached script");
        Ok((sha, script))
    }

    /// Looks a script up by digest, in either case.
    pub fn get(&self, sha: &str) -> Option<Arc<Script>> {
        let scripts = self.scripts.read().unwrap_or_else(PoisonError::into_inner);
        scripts.get(&sha.to_ascii_lowercase()).cloned()
    }

    pub fn exists(&self, sha: &str) -> bool {
        self.get(sha).is_some()
    }

    /// Drops every cached script.
    pub fn flush(&self) {
        self.scripts.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.scripts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        assert_eq!(digest(b"return 1").len(), 64);
        assert_eq!(digest(b"return 1"), digest(b"return 1"));
        assert_ne!(digest(b"return 1"), digest(b"return 2"));
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_load_and_get() {
        let cache = ScriptCache::new();
        let (sha, script) = cache.load(Bytes::from("return 1")).unwrap();
        assert_eq!(sha.len(), 64);
        assert_eq!(script.source, Bytes::from("return 1"));
        assert!(cache.exists(&sha));
        assert!(cache.exists(&sha.to_uppercase()));
        assert_eq!(cache.len(), 1);

        // Loading twice keeps one entry.
        let (again, _) = cache.load(Bytes::from("return 1")).unwrap();
        assert_eq!(again, sha);
        assert_eq!(cache.len(), 1);

        cache.flush();
        assert!(cache.is_empty());
        assert!(!cache.exists(&sha));
    }

    #[test]
    fn test_load_rejects_bad_source() {
        let cache = ScriptCache::new();
        assert!(cache.load(Bytes::from("return (")).is_err());
        assert!(cache.is_empty());
    }
}
