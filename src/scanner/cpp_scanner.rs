use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use super::{Dependency, ProjectManifest, Scanner};
use crate::ecosystem::strategy;
use crate::error::{DepcatError, Result};
use crate::types::Ecosystem;

/// vcpkg manifests, conanfile.txt and `find_package` calls in CMakeLists.txt.
pub struct CppScanner;

/// Modules CMake ships itself; they name no installable package.
const CMAKE_BUILTINS: &[&str] = &["Threads", "PkgConfig", "OpenGL", "OpenMP", "Python", "Python3"];

fn find_package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)find_package\s*\(\s*([A-Za-z0-9_.+-]+)(?:\s+([0-9][0-9.]*))?").expect("valid find_package regex")
    })
}

fn cmake_project_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)project\s*\(\s*([A-Za-z0-9_.+-]+)").expect("valid project regex"))
}

/// A directory whose only C++ manifest is a CMakeLists.txt. Such a
/// directory below another C++ root is a subdirectory of that build.
pub fn is_cmake_only(dir: &Path) -> bool {
    dir.join("CMakeLists.txt").is_file() && !dir.join("vcpkg.json").is_file() && !dir.join("conanfile.txt").is_file()
}

impl CppScanner {
    pub fn new() -> Self {
        Self
    }

    fn push(dependencies: &mut Vec<Dependency>, name: &str, version: Option<&str>, declared: Option<String>, is_dev: bool) {
        if dependencies.iter().any(|d| d.name.eq_ignore_ascii_case(name)) {
            return;
        }
        dependencies.push(Dependency {
            name: name.to_string(),
            version: version.unwrap_or_default().to_string(),
            declared,
            is_dev,
        });
    }

    fn scan_vcpkg(path: &Path, dependencies: &mut Vec<Dependency>) -> Result<Option<String>> {
        let content = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&content).map_err(|e| DepcatError::manifest(path, e))?;

        let overrides: HashMap<String, String> = json
            .get("overrides")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|o| {
                        let name = o.get("name")?.as_str()?;
                        let version = ["version", "version-string", "version-semver", "version-date"]
                            .iter()
                            .find_map(|key| o.get(*key).and_then(|v| v.as_str()))?;
                        Some((name.to_string(), version.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(items) = json.get("dependencies").and_then(|v| v.as_array()) {
            for item in items {
                let (name, minimum, is_dev) = match item {
                    serde_json::Value::String(name) => (name.as_str(), None, false),
                    serde_json::Value::Object(obj) => {
                        let Some(name) = obj.get("name").and_then(|v| v.as_str()) else {
                            continue;
                        };
                        let minimum = obj.get("version>=").and_then(|v| v.as_str());
                        let host = obj.get("host").and_then(|v| v.as_bool()).unwrap_or(false);
                        (name, minimum, host)
                    }
                    _ => continue,
                };
                let pinned = overrides.get(name).map(String::as_str);
                let declared = pinned.map(str::to_string).or_else(|| minimum.map(|m| format!(">={}", m)));
                Self::push(dependencies, name, pinned.or(minimum), declared, is_dev);
            }
        }

        Ok(json.get("name").and_then(|v| v.as_str()).map(str::to_string))
    }

    fn scan_conanfile(path: &Path, dependencies: &mut Vec<Dependency>) -> Result<()> {
        let content = fs::read_to_string(path)?;
        let mut section = String::new();

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }
            let is_dev = match section.as_str() {
                "requires" => false,
                "tool_requires" | "build_requires" | "test_requires" => true,
                _ => continue,
            };

            // zlib/1.3.1, fmt/10.2.1@user/channel, boost/[>=1.80 <2]
            let reference = line.split('@').next().unwrap_or(line);
            let Some((name, version)) = reference.split_once('/') else {
                return Err(DepcatError::manifest(path, format!("bad reference `{}`", line)));
            };
            let version = version.trim();
            let concrete = if version.starts_with('[') {
                None
            } else {
                Some(version.split('#').next().unwrap_or(version))
            };
            Self::push(dependencies, name.trim(), concrete, Some(version.to_string()), is_dev);
        }
        Ok(())
    }

    fn scan_cmake(path: &Path, dependencies: &mut Vec<Dependency>) -> Result<Option<String>> {
        let content = fs::read_to_string(path)?;
        for caps in find_package_regex().captures_iter(&content) {
            let name = &caps[1];
            if CMAKE_BUILTINS.contains(&name) {
                continue;
            }
            let version = caps.get(2).map(|m| m.as_str());
            Self::push(dependencies, name, version, version.map(|v| format!(">={}", v)), false);
        }
        Ok(cmake_project_regex()
            .captures(&content)
            .map(|caps| caps[1].to_string()))
    }
}

impl Default for CppScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for CppScanner {
    fn detect(&self, dir: &Path) -> Option<Ecosystem> {
        strategy(Ecosystem::Cpp).detects(dir).then_some(Ecosystem::Cpp)
    }

    fn scan_dir(&self, dir: &Path) -> Result<ProjectManifest> {
        let mut dependencies = Vec::new();
        let mut name = None;

        let vcpkg = dir.join("vcpkg.json");
        if vcpkg.is_file() {
            name = Self::scan_vcpkg(&vcpkg, &mut dependencies)?;
        }

        let conan = dir.join("conanfile.txt");
        if conan.is_file() {
            Self::scan_conanfile(&conan, &mut dependencies)?;
        }

        let cmake = dir.join("CMakeLists.txt");
        if cmake.is_file() {
            let cmake_name = Self::scan_cmake(&cmake, &mut dependencies)?;
            name = name.or(cmake_name);
        }

        Ok(ProjectManifest { name, dependencies })
    }
}
