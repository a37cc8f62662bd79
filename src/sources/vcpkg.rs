use super::{flexible_text, http_client, RegistryInfo, Source};
use crate::types::PackageMetadata;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Port manifests of the vcpkg registry (`<ports>/<name>/vcpkg.json`).
pub struct VcpkgSource {
    client: reqwest::Client,
    base_url: String,
}

const VERSION_KEYS: &[&str] = &["version", "version-semver", "version-date", "version-string"];

impl VcpkgSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Port names are lowercase; CMake package names often are not.
    fn port_url(&self, name: &str) -> String {
        format!("{}/{}/vcpkg.json", self.base_url, name.to_ascii_lowercase())
    }

    fn parse_port(port: &serde_json::Value) -> Result<RegistryInfo> {
        let version = VERSION_KEYS
            .iter()
            .find_map(|key| port.get(*key).and_then(|v| v.as_str()))
            .context("Port manifest has no version field")?;
        let port_version = port.get("port-version").and_then(|v| v.as_u64()).unwrap_or(0);
        let latest_version = if port_version > 0 {
            format!("{}#{}", version, port_version)
        } else {
            version.to_string()
        };

        Ok(RegistryInfo {
            latest_version,
            metadata: PackageMetadata {
                description: flexible_text(port.get("description"), "text"),
                author: flexible_text(port.get("maintainers"), "name"),
                license: flexible_text(port.get("license"), "id"),
                homepage: flexible_text(port.get("homepage"), "url"),
                repository: None,
            },
        })
    }
}

#[async_trait]
impl Source for VcpkgSource {
    async fn lookup(&self, name: &str) -> Result<RegistryInfo> {
        let response = self
            .client
            .get(self.port_url(name))
            .send()
            .await
            .context("Failed to fetch vcpkg port manifest")?;

        if !response.status().is_success() {
            anyhow::bail!("vcpkg port lookup for {} failed: {}", name, response.status());
        }

        let port: serde_json::Value = response.json().await.context("Failed to parse vcpkg port manifest")?;
        Self::parse_port(&port)
    }
}
