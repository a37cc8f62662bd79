use super::{http_client, RegistryInfo, Source};
use crate::types::PackageMetadata;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct PypiResponse {
    info: PypiInfo,
}

#[derive(Debug, Deserialize)]
struct PypiInfo {
    version: String,
    summary: Option<String>,
    author: Option<String>,
    author_email: Option<String>,
    license: Option<String>,
    home_page: Option<String>,
    #[serde(default)]
    project_urls: Option<HashMap<String, String>>,
}

/// PyPI JSON API (`/pypi/<name>/json`).
pub struct PypiSource {
    client: reqwest::Client,
    base_url: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != "UNKNOWN")
}

impl PypiSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}/json", self.base_url, name)
    }

    fn into_registry_info(response: PypiResponse) -> RegistryInfo {
        let info = response.info;
        let urls = info.project_urls.unwrap_or_default();
        let url = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| urls.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.clone()))
        };

        // long license texts are summarised by their first line
        let license = non_empty(info.license).map(|l| l.lines().next().unwrap_or_default().to_string());

        RegistryInfo {
            latest_version: info.version,
            metadata: PackageMetadata {
                description: non_empty(info.summary),
                author: non_empty(info.author).or_else(|| non_empty(info.author_email)),
                license,
                homepage: non_empty(info.home_page).or_else(|| url(&["Homepage", "Home"])),
                repository: url(&["Source", "Repository", "Source Code", "Code"]),
            },
        }
    }
}

#[async_trait]
impl Source for PypiSource {
    async fn lookup(&self, name: &str) -> Result<RegistryInfo> {
        let response = self
            .client
            .get(self.package_url(name))
            .send()
            .await
            .context("Failed to fetch package info from PyPI")?;

        if !response.status().is_success() {
            anyhow::bail!("PyPI API error for {}: {}", name, response.status());
        }

        let body: PypiResponse = response.json().await.context("Failed to parse PyPI response")?;
        Ok(Self::into_registry_info(body))
    }
}
