use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CachedSource;
use crate::config::Config;
use crate::types::{Ecosystem, PackageMetadata};

pub mod npm;
pub mod pypi;
pub mod vcpkg;

pub use npm::NpmSource;
pub use pypi::PypiSource;
pub use vcpkg::VcpkgSource;

/// What a registry knows about the newest release of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryInfo {
    pub latest_version: String,
    pub metadata: PackageMetadata,
}

impl RegistryInfo {
    pub fn new(latest_version: impl Into<String>) -> Self {
        Self {
            latest_version: latest_version.into(),
            metadata: PackageMetadata::default(),
        }
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Absolute latest published version, regardless of any declared range
    async fn lookup(&self, name: &str) -> Result<RegistryInfo>;
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("depcat/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Registry fields are a string in some documents and an object in others,
/// e.g. `"author": "Jane"` vs `"author": { "name": "Jane" }`.
pub(crate) fn flexible_text(value: Option<&serde_json::Value>, key: &str) -> Option<String> {
    let text = match value? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj.get(key)?.as_str()?.to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Registry of sources, one per ecosystem. Both JavaScript ecosystems
/// resolve against the same npm-compatible registry.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<Ecosystem, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registries = &config.registries;
        let npm = NpmSource::new(&registries.npm)?;
        let pypi = PypiSource::new(&registries.pypi)?;
        let vcpkg = VcpkgSource::new(&registries.vcpkg)?;

        let (npm, pypi, vcpkg): (Arc<dyn Source>, Arc<dyn Source>, Arc<dyn Source>) = if config.global.cache_enabled {
            let ttl = Duration::from_secs(config.global.cache_ttl);
            (
                Arc::new(CachedSource::new(npm, "npm")?.with_ttl(ttl)),
                Arc::new(CachedSource::new(pypi, "pypi")?.with_ttl(ttl)),
                Arc::new(CachedSource::new(vcpkg, "vcpkg")?.with_ttl(ttl)),
            )
        } else {
            (Arc::new(npm), Arc::new(pypi), Arc::new(vcpkg))
        };

        Ok(Self::new()
            .with_source(Ecosystem::JsNpm, npm.clone())
            .with_source(Ecosystem::JsBun, npm)
            .with_source(Ecosystem::Python, pypi)
            .with_source(Ecosystem::Cpp, vcpkg))
    }

    pub fn with_source(mut self, ecosystem: Ecosystem, source: Arc<dyn Source>) -> Self {
        self.sources.insert(ecosystem, source);
        self
    }

    pub fn get_source(&self, ecosystem: Ecosystem) -> Option<&dyn Source> {
        self.sources.get(&ecosystem).map(|s| s.as_ref())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Answers from a fixed table; unknown names fail like a registry 404.
    #[derive(Default)]
    pub struct FakeSource {
        versions: HashMap<String, String>,
        pub lookups: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, name: &str, latest: &str) -> Self {
            self.versions.insert(name.to_string(), latest.to_string());
            self
        }
    }

    #[async_trait]
    impl Source for FakeSource {
        async fn lookup(&self, name: &str) -> Result<RegistryInfo> {
            self.lookups.lock().unwrap().push(name.to_string());
            match self.versions.get(name) {
                Some(latest) => {
                    let mut info = RegistryInfo::new(latest);
                    info.metadata.license = Some("MIT".to_string());
                    Ok(info)
                }
                None => anyhow::bail!("{} not found", name),
            }
        }
    }
}
