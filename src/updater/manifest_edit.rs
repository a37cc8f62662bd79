use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// PEP 503 comparison of distribution names.
fn same_distribution(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.to_ascii_lowercase().replace(['_', '.'], "-");
    normalize(a) == normalize(b)
}

/// Distribution name at the start of a requirement line, if any.
fn requirement_name(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('-') {
        return None;
    }
    let end = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        .unwrap_or(trimmed.len());
    (end > 0).then(|| &trimmed[..end])
}

/// Pin `name` to `==version` in a requirements file, keeping extras,
/// environment markers and trailing comments. None if the name is absent.
pub fn pin_requirement(content: &str, name: &str, version: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            let Some(found) = requirement_name(line).filter(|n| same_distribution(n, name)) else {
                return line.to_string();
            };
            changed = true;

            let (body, comment) = match line.find(" #") {
                Some(i) => {
                    let i = line[..i].trim_end().len();
                    (&line[..i], &line[i..])
                }
                None => (line, ""),
            };
            let (body, marker) = match body.find(';') {
                Some(i) => (&body[..i], &body[i..]),
                None => (body, ""),
            };
            let rest = body.trim_start()[found.len()..].trim_start();
            let extras = if rest.starts_with('[') {
                rest.find(']').map(|i| &rest[..=i]).unwrap_or("")
            } else {
                ""
            };
            let marker = if marker.is_empty() { String::new() } else { format!(" {}", marker.trim()) };
            format!("{}{}=={}{}{}", found, extras, version, marker, comment)
        })
        .collect();

    changed.then(|| join_lines(content, lines))
}

/// Drop every line requiring `name`. None if the name is absent.
pub fn remove_requirement(content: &str, name: &str) -> Option<String> {
    let before = content.lines().count();
    let lines: Vec<String> = content
        .lines()
        .filter(|line| !requirement_name(line).map_or(false, |n| same_distribution(n, name)))
        .map(str::to_string)
        .collect();
    (lines.len() != before).then(|| join_lines(content, lines))
}

fn join_lines(original: &str, lines: Vec<String>) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

fn conan_sections(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    (trimmed.starts_with('[') && trimmed.ends_with(']')).then(|| trimmed[1..trimmed.len() - 1].trim())
}

fn is_requires_section(section: &str) -> bool {
    matches!(section, "requires" | "tool_requires" | "build_requires" | "test_requires")
}

fn conan_reference_name(line: &str) -> Option<&str> {
    line.trim().split('/').next().filter(|n| !n.is_empty() && !n.starts_with('#'))
}

/// Point a conanfile.txt reference at `version`, keeping any `@user/channel`.
/// A missing reference is added under `[requires]`.
pub fn set_conan_require(content: &str, name: &str, version: &str) -> String {
    let mut section = String::new();
    let mut changed = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if let Some(s) = conan_sections(line) {
                section = s.to_string();
                return line.to_string();
            }
            if !is_requires_section(&section) || conan_reference_name(line) != Some(name) {
                return line.to_string();
            }
            changed = true;
            let trimmed = line.trim();
            let channel = trimmed.find('@').map(|i| &trimmed[i..]).unwrap_or("");
            format!("{}/{}{}", name, version, channel)
        })
        .collect();

    if !changed {
        let reference = format!("{}/{}", name, version);
        match lines.iter().position(|l| conan_sections(l) == Some("requires")) {
            Some(i) => lines.insert(i + 1, reference),
            None => {
                lines.insert(0, String::new());
                lines.insert(0, reference);
                lines.insert(0, "[requires]".to_string());
            }
        }
    }
    join_lines(content, lines)
}

pub fn remove_conan_require(content: &str, name: &str) -> Option<String> {
    let mut section = String::new();
    let before = content.lines().count();
    let lines: Vec<String> = content
        .lines()
        .filter(|line| {
            if let Some(s) = conan_sections(line) {
                section = s.to_string();
                return true;
            }
            !(is_requires_section(&section) && conan_reference_name(line) == Some(name))
        })
        .map(str::to_string)
        .collect();
    (lines.len() != before).then(|| join_lines(content, lines))
}

fn vcpkg_dependency_name(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(name) => Some(name.as_str()),
        Value::Object(obj) => obj.get("name")?.as_str(),
        _ => None,
    }
}

/// Pin a port through `overrides`. `10.2.1#2` sets `port-version` 2.
/// The port is added to `dependencies` if it is not listed yet.
pub fn set_vcpkg_override(content: &str, name: &str, version: &str) -> Result<String> {
    let mut json: Value = serde_json::from_str(content).context("Failed to parse vcpkg.json")?;
    let obj = json.as_object_mut().context("vcpkg.json is not an object")?;

    let dependencies = obj
        .entry("dependencies")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .context("vcpkg.json dependencies is not an array")?;
    if !dependencies.iter().any(|d| vcpkg_dependency_name(d) == Some(name)) {
        dependencies.push(Value::String(name.to_string()));
    }

    let (base, port_version) = match version.split_once('#') {
        Some((base, port)) => (base, port.parse::<u64>().ok()),
        None => (version, None),
    };
    let mut pin = Map::new();
    pin.insert("name".to_string(), Value::String(name.to_string()));
    pin.insert("version".to_string(), Value::String(base.to_string()));
    if let Some(port) = port_version.filter(|p| *p > 0) {
        pin.insert("port-version".to_string(), Value::from(port));
    }

    let overrides = obj
        .entry("overrides")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .context("vcpkg.json overrides is not an array")?;
    let existing = overrides.iter().position(|o| vcpkg_dependency_name(o) == Some(name));
    match existing {
        Some(i) => overrides[i] = Value::Object(pin),
        None => overrides.push(Value::Object(pin)),
    }

    serde_json::to_string_pretty(&json).context("Failed to serialize vcpkg.json")
}

pub fn remove_vcpkg_dependency(content: &str, name: &str) -> Result<Option<String>> {
    let mut json: Value = serde_json::from_str(content).context("Failed to parse vcpkg.json")?;
    let obj = json.as_object_mut().context("vcpkg.json is not an object")?;

    let mut removed = false;
    for key in ["dependencies", "overrides"] {
        if let Some(items) = obj.get_mut(key).and_then(|v| v.as_array_mut()) {
            let before = items.len();
            items.retain(|d| vcpkg_dependency_name(d) != Some(name));
            removed |= items.len() != before;
        }
    }
    if !removed {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string_pretty(&json).context("Failed to serialize vcpkg.json")?))
}

/// A manifest rewritten ahead of a tool run. Unless committed, the original
/// content is written back when the backup goes out of scope.
pub struct ManifestBackup {
    path: std::path::PathBuf,
    original: Option<String>,
}

impl ManifestBackup {
    /// Keep the edited manifest.
    pub fn commit(mut self) {
        self.original = None;
    }

    pub fn restore(mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => {
                fs::write(&self.path, original).with_context(|| format!("Failed to restore {:?}", self.path))
            }
            None => Ok(()),
        }
    }
}

impl Drop for ManifestBackup {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            if let Err(e) = fs::write(&self.path, original) {
                tracing::error!(path = %self.path.display(), error = %e, "could not restore manifest");
            }
        }
    }
}

/// Apply `edit` to the file at `path`. Returns a backup when the content changed.
pub fn edit_file(
    path: &Path,
    edit: impl FnOnce(&str) -> Result<Option<String>>,
) -> Result<Option<ManifestBackup>> {
    let original = fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let Some(updated) = edit(&original)? else {
        return Ok(None);
    };
    if updated == original {
        return Ok(None);
    }
    fs::write(path, &updated).with_context(|| format!("Failed to write updated content to {:?}", path))?;
    Ok(Some(ManifestBackup {
        path: path.to_path_buf(),
        original: Some(original),
    }))
}
