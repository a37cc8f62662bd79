use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ecosystem::PackageManager;

/// Sentinel project paths for system-wide installation scopes.
pub const GLOBAL_NPM_PATH: &str = "::global::npm";
pub const GLOBAL_BUN_PATH: &str = "::global::bun";
pub const GLOBAL_PYTHON_PATH: &str = "::global::python";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ecosystem {
    #[serde(rename = "npm")]
    JsNpm,
    #[serde(rename = "bun")]
    JsBun,
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "cpp")]
    Cpp,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 4] = [Ecosystem::JsNpm, Ecosystem::JsBun, Ecosystem::Python, Ecosystem::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::JsNpm => "npm",
            Ecosystem::JsBun => "bun",
            Ecosystem::Python => "python",
            Ecosystem::Cpp => "cpp",
        }
    }

    pub fn is_js(&self) -> bool {
        matches!(self, Ecosystem::JsNpm | Ecosystem::JsBun)
    }

    /// The sentinel project path for this ecosystem's global scope, if it has one.
    pub fn global_path(&self) -> Option<&'static str> {
        match self {
            Ecosystem::JsNpm => Some(GLOBAL_NPM_PATH),
            Ecosystem::JsBun => Some(GLOBAL_BUN_PATH),
            Ecosystem::Python => Some(GLOBAL_PYTHON_PATH),
            Ecosystem::Cpp => None,
        }
    }

    pub fn from_global_path(path: &str) -> Option<Ecosystem> {
        match path {
            GLOBAL_NPM_PATH => Some(Ecosystem::JsNpm),
            GLOBAL_BUN_PATH => Some(Ecosystem::JsBun),
            GLOBAL_PYTHON_PATH => Some(Ecosystem::Python),
            _ => None,
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "npm" | "js" | "node" => Ok(Ecosystem::JsNpm),
            "bun" => Ok(Ecosystem::JsBun),
            "python" | "py" | "pip" => Ok(Ecosystem::Python),
            "cpp" | "c++" | "cxx" => Ok(Ecosystem::Cpp),
            other => Err(format!("Unknown ecosystem: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub path: String,
    pub name: String,
    pub ecosystem: Ecosystem,
    pub is_group: bool,
    pub parent_path: Option<String>,
    pub package_count: usize,
    pub last_scanned: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Source tracking, only meaningful when the root is a git working copy
    pub is_git_repo: bool,
    pub local_revision: Option<String>,
    pub remote_revision: Option<String>,
    pub update_available: bool,
}

impl Project {
    pub fn new(path: impl Into<String>, name: impl Into<String>, ecosystem: Ecosystem) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            name: name.into(),
            ecosystem,
            is_group: false,
            parent_path: None,
            package_count: 0,
            last_scanned: None,
            created_at: now,
            updated_at: now,
            is_git_repo: false,
            local_revision: None,
            remote_revision: None,
            update_available: false,
        }
    }

    /// The sentinel project standing for an ecosystem's global scope.
    pub fn global(ecosystem: Ecosystem) -> Option<Self> {
        let path = ecosystem.global_path()?;
        let mut project = Self::new(path, global_label(ecosystem), ecosystem);
        project.last_scanned = Some(Utc::now());
        Some(project)
    }

    pub fn is_global(&self) -> bool {
        Ecosystem::from_global_path(&self.path).is_some()
    }

    pub fn display_name(&self) -> String {
        match Ecosystem::from_global_path(&self.path) {
            Some(ecosystem) => global_label(ecosystem).to_string(),
            None => self.name.clone(),
        }
    }
}

fn global_label(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::JsNpm => "Global NPM Packages",
        Ecosystem::JsBun => "Global Bun Packages",
        Ecosystem::Python => "Global Python Packages",
        Ecosystem::Cpp => "Global C++ Packages",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub project_path: String,
    pub name: String,
    pub ecosystem: Ecosystem,

    /// Installed version, or the declared requirement with its operator stripped
    pub version: String,
    /// Requirement exactly as written in the manifest
    pub declared: Option<String>,

    pub latest_version: Option<String>,
    pub is_outdated: bool,
    pub not_found: bool,
    pub is_dev: bool,

    #[serde(flatten)]
    pub metadata: PackageMetadata,

    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    pub fn new(
        project_path: impl Into<String>,
        name: impl Into<String>,
        ecosystem: Ecosystem,
        version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_path: project_path.into(),
            name: name.into(),
            ecosystem,
            version: version.into(),
            declared: None,
            latest_version: None,
            is_outdated: false,
            not_found: false,
            is_dev: false,
            metadata: PackageMetadata::default(),
            last_checked: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    pub fn is_global(&self) -> bool {
        Ecosystem::from_global_path(&self.project_path).is_some()
    }
}

/// Facts observed on disk by one scan request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Groups are listed before the projects nested in them
    pub projects: Vec<Project>,
    pub packages: Vec<Package>,
    pub packages_found: usize,
    pub duration: Duration,
    /// Ecosystems this scan was authoritative for
    pub ecosystems: Vec<Ecosystem>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.packages.is_empty()
    }

    pub fn merge(&mut self, other: ScanResult) {
        self.projects.extend(other.projects);
        self.packages.extend(other.packages);
        self.packages_found += other.packages_found;
        self.duration += other.duration;
        for ecosystem in other.ecosystems {
            if !self.ecosystems.contains(&ecosystem) {
                self.ecosystems.push(ecosystem);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheck {
    pub package: Package,
    pub latest_version: Option<String>,
    pub is_outdated: bool,
    pub not_found: bool,
}

/// How far the catalog's belief about an updated package was confirmed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verification {
    Verified,
    /// The verification scan missed; the version is trusted, not observed
    Degraded,
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub project_path: String,
    pub name: String,
    pub success: bool,
    pub old_version: String,
    pub new_version: Option<String>,
    pub error_message: Option<String>,
    pub verification: Verification,
}

impl UpdateResult {
    pub fn failed(package: &Package, message: impl Into<String>) -> Self {
        Self {
            project_path: package.project_path.clone(),
            name: package.name.clone(),
            success: false,
            old_version: package.version.clone(),
            new_version: None,
            error_message: Some(message.into()),
            verification: Verification::NotAttempted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdateResult {
    pub project_path: String,
    pub manager: Option<PackageManager>,
    pub success: bool,
    pub details: String,
    pub error_message: Option<String>,
}

/// Outcome of a sequential batch of package updates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub succeeded: Vec<UpdateResult>,
    pub failed: Vec<UpdateResult>,
}

impl BatchSummary {
    pub fn push(&mut self, result: UpdateResult) {
        if result.success {
            self.succeeded.push(result);
        } else {
            self.failed.push(result);
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded.len(), self.failed.len())?;
        for failure in &self.failed {
            write!(
                f,
                "\n  {} ({}): {}",
                failure.name,
                failure.project_path,
                failure.error_message.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}
