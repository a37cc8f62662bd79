use super::{flexible_text, http_client, RegistryInfo, Source};
use crate::types::PackageMetadata;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct NpmPackageInfo {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    description: Option<String>,
    homepage: Option<String>,
    license: Option<serde_json::Value>,
    author: Option<serde_json::Value>,
    repository: Option<serde_json::Value>,
}

/// npm-compatible registry, used for both npm and bun projects.
pub struct NpmSource {
    client: reqwest::Client,
    base_url: String,
}

impl NpmSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Scoped names keep their `@` but escape the slash: `@babel%2Fcore`.
    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.replace('/', "%2F"))
    }

    async fn fetch_package_info(&self, name: &str) -> Result<NpmPackageInfo> {
        let url = self.package_url(name);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to fetch package info from npm registry")?;

        if !response.status().is_success() {
            anyhow::bail!("npm registry API error for {}: {}", name, response.status());
        }

        response.json().await.context("Failed to parse npm registry response")
    }

    fn into_registry_info(info: NpmPackageInfo) -> Result<RegistryInfo> {
        let latest = info
            .dist_tags
            .get("latest")
            .context("No 'latest' tag found for npm package")?;

        Ok(RegistryInfo {
            latest_version: latest.clone(),
            metadata: PackageMetadata {
                description: info.description,
                author: flexible_text(info.author.as_ref(), "name"),
                license: flexible_text(info.license.as_ref(), "type"),
                homepage: info.homepage,
                repository: flexible_text(info.repository.as_ref(), "url"),
            },
        })
    }
}

#[async_trait]
impl Source for NpmSource {
    async fn lookup(&self, name: &str) -> Result<RegistryInfo> {
        let info = self.fetch_package_info(name).await?;
        Self::into_registry_info(info)
    }
}
