use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{Dependency, ProjectManifest, Scanner};
use crate::ecosystem::version::strip_requirement;
use crate::ecosystem::{is_requirements_file, strategy};
use crate::error::{DepcatError, Result};
use crate::types::Ecosystem;

/// requirements*.txt, pyproject.toml (PEP 621 and Poetry) and Pipfile projects.
pub struct PythonScanner;

const DEV_GROUPS: &[&str] = &["dev", "test", "tests", "testing", "lint", "docs", "typing"];
const VENV_DIRS: &[&str] = &[".venv", "venv", "env"];

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(\[[^\]]*\])?\s*(.*)$").expect("valid requirement regex")
    })
}

/// PEP 503 normalisation, used to match dist-info directories to requirements.
fn normalize(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

/// Split a PEP 508 line into name and version specifier. Environment
/// markers and URL references are dropped.
fn parse_requirement(line: &str) -> Option<(String, String)> {
    let line = line.split(';').next()?.trim();
    if line.is_empty() || line.contains("://") || line.contains(" @ ") {
        return None;
    }
    let caps = requirement_regex().captures(line)?;
    let name = caps.get(1)?.as_str().to_string();
    let spec = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
    let spec = spec.trim_start_matches('(').trim_end_matches(')').trim().to_string();
    Some((name, spec))
}

/// Poetry and Pipfile write `"*"`, `"^1.2"` or `{ version = "..." }`.
fn table_spec(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Table(t) => match t.get("version") {
            Some(toml::Value::String(s)) => Some(s.clone()),
            _ if t.contains_key("git") || t.contains_key("path") || t.contains_key("url") => None,
            _ => Some("*".to_string()),
        },
        _ => None,
    }
}

impl PythonScanner {
    pub fn new() -> Self {
        Self
    }

    /// Interpreter of the first local virtualenv that has one.
    pub fn venv_python(dir: &Path) -> Option<PathBuf> {
        VENV_DIRS
            .iter()
            .map(|venv| dir.join(venv))
            .filter(|root| root.join("pyvenv.cfg").is_file())
            .flat_map(|root| [root.join("bin").join("python"), root.join("Scripts").join("python.exe")])
            .find(|python| python.is_file())
    }

    fn site_packages(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for venv in VENV_DIRS {
            let root = dir.join(venv);
            if !root.join("pyvenv.cfg").is_file() {
                continue;
            }
            let windows = root.join("Lib").join("site-packages");
            if windows.is_dir() {
                found.push(windows);
            }
            if let Ok(entries) = fs::read_dir(root.join("lib")) {
                for entry in entries.flatten() {
                    let candidate = entry.path().join("site-packages");
                    if candidate.is_dir() {
                        found.push(candidate);
                    }
                }
            }
        }
        found
    }

    /// Versions recorded by `*.dist-info` directories in a local virtualenv.
    fn installed_versions(dir: &Path) -> HashMap<String, String> {
        let mut versions = HashMap::new();
        for site in Self::site_packages(dir) {
            let Ok(entries) = fs::read_dir(site) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name().to_string_lossy().to_string();
                let Some(stem) = file_name.strip_suffix(".dist-info") else {
                    continue;
                };
                if let Some((name, version)) = stem.split_once('-') {
                    versions.insert(normalize(name), version.to_string());
                }
            }
        }
        versions
    }

    fn push(
        dependencies: &mut Vec<Dependency>,
        installed: &HashMap<String, String>,
        name: &str,
        spec: &str,
        is_dev: bool,
    ) {
        let key = normalize(name);
        if let Some(existing) = dependencies.iter_mut().find(|d| normalize(&d.name) == key) {
            existing.is_dev &= is_dev;
            return;
        }

        let declared = (!spec.is_empty() && spec != "*").then(|| spec.to_string());
        let version = installed
            .get(&key)
            .cloned()
            .or_else(|| declared.as_deref().and_then(strip_requirement).map(str::to_string))
            .unwrap_or_else(|| spec.to_string());

        dependencies.push(Dependency {
            name: name.to_string(),
            version,
            declared,
            is_dev,
        });
    }

    fn scan_requirements(
        path: &Path,
        is_dev: bool,
        installed: &HashMap<String, String>,
        dependencies: &mut Vec<Dependency>,
    ) -> Result<()> {
        let content = fs::read_to_string(path)?;
        for raw in content.lines() {
            let line = raw.split(" #").next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
                continue;
            }
            if let Some((name, spec)) = parse_requirement(line) {
                Self::push(dependencies, installed, &name, &spec, is_dev);
            }
        }
        Ok(())
    }

    fn scan_pyproject(
        path: &Path,
        installed: &HashMap<String, String>,
        dependencies: &mut Vec<Dependency>,
    ) -> Result<Option<String>> {
        let content = fs::read_to_string(path)?;
        let doc: toml::Value = toml::from_str(&content).map_err(|e| DepcatError::manifest(path, e))?;

        let project = doc.get("project");
        let strings = |value: Option<&toml::Value>| -> Vec<String> {
            value
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };

        for requirement in strings(project.and_then(|p| p.get("dependencies"))) {
            if let Some((name, spec)) = parse_requirement(&requirement) {
                Self::push(dependencies, installed, &name, &spec, false);
            }
        }
        if let Some(extras) = project.and_then(|p| p.get("optional-dependencies")).and_then(|v| v.as_table()) {
            for (extra, items) in extras {
                let is_dev = DEV_GROUPS.contains(&extra.as_str());
                for requirement in strings(Some(items)) {
                    if let Some((name, spec)) = parse_requirement(&requirement) {
                        Self::push(dependencies, installed, &name, &spec, is_dev);
                    }
                }
            }
        }
        if let Some(groups) = doc.get("dependency-groups").and_then(|v| v.as_table()) {
            for items in groups.values() {
                for requirement in strings(Some(items)) {
                    if let Some((name, spec)) = parse_requirement(&requirement) {
                        Self::push(dependencies, installed, &name, &spec, true);
                    }
                }
            }
        }

        let poetry = doc.get("tool").and_then(|t| t.get("poetry"));
        let mut poetry_tables: Vec<(&toml::Value, bool)> = Vec::new();
        if let Some(poetry) = poetry {
            if let Some(deps) = poetry.get("dependencies") {
                poetry_tables.push((deps, false));
            }
            if let Some(deps) = poetry.get("dev-dependencies") {
                poetry_tables.push((deps, true));
            }
            if let Some(groups) = poetry.get("group").and_then(|g| g.as_table()) {
                for (group, body) in groups {
                    if let Some(deps) = body.get("dependencies") {
                        poetry_tables.push((deps, group != "main"));
                    }
                }
            }
        }
        for (table, is_dev) in poetry_tables {
            let Some(table) = table.as_table() else {
                continue;
            };
            for (name, value) in table {
                if name.eq_ignore_ascii_case("python") {
                    continue;
                }
                if let Some(spec) = table_spec(value) {
                    Self::push(dependencies, installed, name, &spec, is_dev);
                }
            }
        }

        let name = project
            .and_then(|p| p.get("name"))
            .or_else(|| poetry.and_then(|p| p.get("name")))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(name)
    }

    fn scan_pipfile(
        path: &Path,
        installed: &HashMap<String, String>,
        dependencies: &mut Vec<Dependency>,
    ) -> Result<()> {
        let content = fs::read_to_string(path)?;
        let doc: toml::Value = toml::from_str(&content).map_err(|e| DepcatError::manifest(path, e))?;

        for (section, is_dev) in [("packages", false), ("dev-packages", true)] {
            let Some(table) = doc.get(section).and_then(|v| v.as_table()) else {
                continue;
            };
            for (name, value) in table {
                if let Some(spec) = table_spec(value) {
                    Self::push(dependencies, installed, name, &spec, is_dev);
                }
            }
        }
        Ok(())
    }
}

impl Default for PythonScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for PythonScanner {
    fn detect(&self, dir: &Path) -> Option<Ecosystem> {
        strategy(Ecosystem::Python).detects(dir).then_some(Ecosystem::Python)
    }

    fn scan_dir(&self, dir: &Path) -> Result<ProjectManifest> {
        let installed = Self::installed_versions(dir);
        let mut dependencies = Vec::new();
        let mut name = None;

        let pyproject = dir.join("pyproject.toml");
        if pyproject.is_file() {
            name = Self::scan_pyproject(&pyproject, &installed, &mut dependencies)?;
        }

        let pipfile = dir.join("Pipfile");
        if pipfile.is_file() {
            Self::scan_pipfile(&pipfile, &installed, &mut dependencies)?;
        }

        let mut requirement_files: Vec<(String, PathBuf)> = fs::read_dir(dir)?
            .flatten()
            .filter(|e| e.path().is_file())
            .map(|e| (e.file_name().to_string_lossy().to_string(), e.path()))
            .filter(|(file_name, _)| is_requirements_file(file_name))
            .collect();
        // requirements.txt sorts ahead of requirements-dev.txt so production wins
        requirement_files.sort_by_key(|(file_name, _)| (file_name.to_ascii_lowercase() != "requirements.txt", file_name.clone()));

        for (file_name, path) in requirement_files {
            let lower = file_name.to_ascii_lowercase();
            let is_dev = lower.contains("dev") || lower.contains("test");
            Self::scan_requirements(&path, is_dev, &installed, &mut dependencies)?;
        }

        Ok(ProjectManifest { name, dependencies })
    }
}
