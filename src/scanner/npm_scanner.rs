use std::fs;
use std::path::Path;

use super::{Dependency, ProjectManifest, Scanner};
use crate::ecosystem::version::strip_requirement;
use crate::ecosystem::{strategy, EcosystemStrategy, BunStrategy};
use crate::error::{DepcatError, Result};
use crate::types::Ecosystem;

/// `package.json` projects, managed by npm-compatible tools or by bun.
pub struct NpmScanner;

const PROD_SECTIONS: &[&str] = &["dependencies", "optionalDependencies", "peerDependencies"];

impl NpmScanner {
    pub fn new() -> Self {
        Self
    }

    fn installed_version(dir: &Path, name: &str) -> Option<String> {
        let manifest = dir.join("node_modules").join(name).join("package.json");
        let content = fs::read_to_string(manifest).ok()?;
        let json: serde_json::Value = serde_json::from_str(&content).ok()?;
        json.get("version")?.as_str().map(str::to_string)
    }

    fn push_section(
        &self,
        dir: &Path,
        json: &serde_json::Value,
        section: &str,
        is_dev: bool,
        dependencies: &mut Vec<Dependency>,
    ) {
        let Some(deps) = json.get(section).and_then(|v| v.as_object()) else {
            return;
        };
        for (name, declared) in deps {
            if dependencies.iter().any(|d| &d.name == name) {
                continue;
            }
            let declared = declared.as_str().unwrap_or("unknown").to_string();
            let version = Self::installed_version(dir, name)
                .or_else(|| strip_requirement(&declared).map(str::to_string))
                .unwrap_or_else(|| declared.clone());
            dependencies.push(Dependency {
                name: name.clone(),
                version,
                declared: Some(declared),
                is_dev,
            });
        }
    }
}

impl Default for NpmScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for NpmScanner {
    fn detect(&self, dir: &Path) -> Option<Ecosystem> {
        if BunStrategy.detects(dir) {
            Some(Ecosystem::JsBun)
        } else if strategy(Ecosystem::JsNpm).detects(dir) {
            Some(Ecosystem::JsNpm)
        } else {
            None
        }
    }

    fn scan_dir(&self, dir: &Path) -> Result<ProjectManifest> {
        let path = dir.join("package.json");
        let content = fs::read_to_string(&path)?;
        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| DepcatError::manifest(&path, e))?;
        if !json.is_object() {
            return Err(DepcatError::manifest(&path, "package.json is not an object"));
        }

        let mut dependencies = Vec::new();
        for section in PROD_SECTIONS {
            self.push_section(dir, &json, section, false, &mut dependencies);
        }
        self.push_section(dir, &json, "devDependencies", true, &mut dependencies);

        Ok(ProjectManifest {
            name: json.get("name").and_then(|v| v.as_str()).map(str::to_string),
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, content: &str) {
        fs::write(dir.join("package.json"), content).unwrap();
    }

    #[test]
    fn test_scan_mixed_dependencies() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            r#"
{
  "name": "test-project",
  "version": "1.0.0",
  "dependencies": {
    "react": "^18.0.0",
    "react-dom": "^18.0.0"
  },
  "devDependencies": {
    "@types/react": "^18.0.0",
    "vite": "~4.0.0"
  }
}
"#,
        );

        let manifest = NpmScanner::new().scan_dir(temp.path()).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("test-project"));
        assert_eq!(manifest.dependencies.len(), 4);

        let react = manifest.dependencies.iter().find(|d| d.name == "react").unwrap();
        assert_eq!(react.version, "18.0.0");
        assert_eq!(react.declared.as_deref(), Some("^18.0.0"));
        assert!(!react.is_dev);

        let types = manifest.dependencies.iter().find(|d| d.name == "@types/react").unwrap();
        assert!(types.is_dev);
        let vite = manifest.dependencies.iter().find(|d| d.name == "vite").unwrap();
        assert_eq!(vite.version, "4.0.0");
    }

    #[test]
    fn test_installed_version_wins_over_declared_range() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), r#"{"dependencies": {"@babel/core": "^7.0.0"}}"#);
        let installed = temp.path().join("node_modules/@babel/core");
        fs::create_dir_all(&installed).unwrap();
        fs::write(installed.join("package.json"), r#"{"name": "@babel/core", "version": "7.23.9"}"#).unwrap();

        let manifest = NpmScanner::new().scan_dir(temp.path()).unwrap();
        assert_eq!(manifest.dependencies[0].version, "7.23.9");
    }

    #[test]
    fn test_unusual_version_strings_are_kept() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            r#"{"dependencies": {"git-url": "git://github.com/user/repo.git", "latest": "latest", "star": "*"}}"#,
        );

        let manifest = NpmScanner::new().scan_dir(temp.path()).unwrap();
        let git = manifest.dependencies.iter().find(|d| d.name == "git-url").unwrap();
        assert_eq!(git.version, "git://github.com/user/repo.git");
        let latest = manifest.dependencies.iter().find(|d| d.name == "latest").unwrap();
        assert_eq!(latest.version, "latest");
    }

    #[test]
    fn test_dependency_listed_twice_stays_production() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            r#"{"dependencies": {"lodash": "4.17.21"}, "devDependencies": {"lodash": "4.17.21"}}"#,
        );

        let manifest = NpmScanner::new().scan_dir(temp.path()).unwrap();
        assert_eq!(manifest.dependencies.len(), 1);
        assert!(!manifest.dependencies[0].is_dev);
    }

    #[test]
    fn test_empty_manifest_is_a_valid_project() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), r#"{"name": "empty"}"#);

        let manifest = NpmScanner::new().scan_dir(temp.path()).unwrap();
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_malformed_manifest_is_a_parse_error() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), r#"{"dependencies": {"#);

        let err = NpmScanner::new().scan_dir(temp.path()).unwrap_err();
        assert!(matches!(err, DepcatError::ManifestParse { .. }));
    }

    #[test]
    fn test_bun_lockfile_selects_bun() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "{}");
        assert_eq!(NpmScanner::new().detect(temp.path()), Some(Ecosystem::JsNpm));

        fs::write(temp.path().join("bun.lockb"), [0u8; 4]).unwrap();
        assert_eq!(NpmScanner::new().detect(temp.path()), Some(Ecosystem::JsBun));
    }
}
