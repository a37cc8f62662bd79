use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

use super::CatalogStore;
use crate::error::{DepcatError, Result};
use crate::types::{Package, Project};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDump {
    pub exported_at: DateTime<Utc>,
    pub projects: Vec<Project>,
    pub packages: Vec<Package>,
}

pub fn dump(catalog: &CatalogStore) -> Result<CatalogDump> {
    let mut projects = catalog.get_all_projects()?;
    let mut packages = catalog.get_all_packages()?;
    projects.sort_by(|a, b| a.path.cmp(&b.path));
    packages.sort_by(|a, b| (&a.project_path, &a.name).cmp(&(&b.project_path, &b.name)));

    Ok(CatalogDump {
        exported_at: Utc::now(),
        projects,
        packages,
    })
}

pub fn to_json(catalog: &CatalogStore) -> Result<String> {
    Ok(serde_json::to_string_pretty(&dump(catalog)?)?)
}

/// One row per package, labelled with its project's display name.
pub fn write_csv<W: Write>(catalog: &CatalogStore, writer: W) -> Result<()> {
    let dump = dump(catalog)?;
    let names: HashMap<&str, String> = dump
        .projects
        .iter()
        .map(|p| (p.path.as_str(), p.display_name()))
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "Project",
        "Project Path",
        "Ecosystem",
        "Package",
        "Version",
        "Latest Version",
        "Outdated",
        "Not Found",
        "Dev",
        "License",
        "Homepage",
        "Last Checked",
    ])?;

    for package in &dump.packages {
        let project = names
            .get(package.project_path.as_str())
            .cloned()
            .unwrap_or_else(|| package.project_path.clone());
        wtr.write_record([
            project,
            package.project_path.clone(),
            package.ecosystem.to_string(),
            package.name.clone(),
            package.version.clone(),
            package.latest_version.clone().unwrap_or_default(),
            package.is_outdated.to_string(),
            package.not_found.to_string(),
            package.is_dev.to_string(),
            package.metadata.license.clone().unwrap_or_default(),
            package.metadata.homepage.clone().unwrap_or_default(),
            package.last_checked.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn to_csv(catalog: &CatalogStore) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(catalog, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| DepcatError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
