use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    timestamp: SystemTime,
}

impl<T> CacheEntry<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            timestamp: SystemTime::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed().unwrap_or(Duration::MAX) > ttl
    }
}

/// JSON files under the user cache directory, keyed by a SHA-256 of the request.
pub struct Cache {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    pub fn default_dir() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
            .join("depcat"))
    }

    pub fn new() -> Result<Self> {
        Self::in_dir(Self::default_dir()?)
    }

    pub fn in_dir(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            cache_dir,
            ttl: Duration::from_secs(1800),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_key(&self, source: &str, name: &str, operation: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b":");
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(operation.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, source: &str, name: &str, operation: &str) -> Option<T> {
        let path = self.cache_path(&self.cache_key(source, name, operation));
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry<T> = serde_json::from_str(&content).ok()?;

        if entry.is_expired(self.ttl) {
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(entry.data)
    }

    pub fn set<T: Serialize>(&self, source: &str, name: &str, operation: &str, data: &T) -> Result<()> {
        let path = self.cache_path(&self.cache_key(source, name, operation));
        let content = serde_json::to_string_pretty(&CacheEntry::new(data))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Remove every cached response. Returns how many entries were dropped.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if self.cache_dir.exists() {
            for entry in std::fs::read_dir(&self.cache_dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|s| s.to_str()) == Some("json") {
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

// Wrapper for caching registry lookups
use crate::sources::{RegistryInfo, Source};
use async_trait::async_trait;

pub struct CachedSource<S: Source> {
    inner: S,
    cache: Cache,
    source_name: String,
}

impl<S: Source> CachedSource<S> {
    pub fn new(inner: S, source_name: impl Into<String>) -> Result<Self> {
        Ok(Self::with_cache(inner, source_name, Cache::new()?))
    }

    pub fn with_cache(inner: S, source_name: impl Into<String>, cache: Cache) -> Self {
        Self {
            inner,
            cache,
            source_name: source_name.into(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache = self.cache.with_ttl(ttl);
        self
    }
}

#[async_trait]
impl<S: Source> Source for CachedSource<S> {
    async fn lookup(&self, name: &str) -> Result<RegistryInfo> {
        if let Some(info) = self.cache.get::<RegistryInfo>(&self.source_name, name, "lookup") {
            return Ok(info);
        }

        // failures are not cached, so a registry outage heals on the next check
        let info = self.inner.lookup(name).await?;
        let _ = self.cache.set(&self.source_name, name, "lookup", &info);
        Ok(info)
    }
}
