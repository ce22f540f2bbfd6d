use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::services::cache::client::{CacheClient, CacheResult};

/// In-process cache for development runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    strings: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.strings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn hset(&self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) {
        self.hashes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.into())
            .or_default()
            .insert(field.into(), value.into());
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self
            .strings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn hget_string(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        Ok(self
            .hashes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_back_strings_and_hash_fields() {
        let cache = MemoryCache::new();
        cache.set("merchant2tenant:M1", "T1");
        cache.hset("wx_tokens_abc", "OPEN_ID", "o-1");

        assert_eq!(
            cache.get_string("merchant2tenant:M1").await.unwrap().as_deref(),
            Some("T1")
        );
        assert_eq!(
            cache.hget_string("wx_tokens_abc", "OPEN_ID").await.unwrap().as_deref(),
            Some("o-1")
        );
        assert!(cache.hget_string("wx_tokens_abc", "UNION_ID").await.unwrap().is_none());
        assert!(cache.get_string("missing").await.unwrap().is_none());
    }
}
