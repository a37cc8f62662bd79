use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

pub mod version;

use crate::types::Ecosystem;
use self::version::{parse_pep440, parse_release, parse_semver_like, VersionKey};

pub const BUN_LOCKFILES: &[&str] = &["bun.lockb", "bun.lock"];

/// Native tool that governs a project's dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Bun,
    Pnpm,
    Yarn,
    Npm,
    Poetry,
    Pipenv,
    Pip,
    Conan,
    Vcpkg,
}

/// Lockfile precedence used to pick the governing tool. Earlier rows win.
const DETECTION_ORDER: &[(PackageManager, &[&str])] = &[
    (PackageManager::Bun, BUN_LOCKFILES),
    (PackageManager::Pnpm, &["pnpm-lock.yaml"]),
    (PackageManager::Yarn, &["yarn.lock"]),
    (PackageManager::Npm, &["package-lock.json", "npm-shrinkwrap.json"]),
    (PackageManager::Poetry, &["poetry.lock"]),
    (PackageManager::Pipenv, &["Pipfile.lock", "Pipfile"]),
    (PackageManager::Pip, &["requirements.txt"]),
    (PackageManager::Conan, &["conanfile.txt", "conanfile.py"]),
    (PackageManager::Vcpkg, &["vcpkg.json"]),
];

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Npm => "npm",
            PackageManager::Poetry => "poetry",
            PackageManager::Pipenv => "pipenv",
            PackageManager::Pip => "pip",
            PackageManager::Conan => "conan",
            PackageManager::Vcpkg => "vcpkg",
        }
    }

    /// Whether this tool can manage packages of `ecosystem`.
    pub fn serves(&self, ecosystem: Ecosystem) -> bool {
        match self {
            PackageManager::Bun | PackageManager::Pnpm | PackageManager::Yarn | PackageManager::Npm => {
                ecosystem.is_js()
            }
            PackageManager::Poetry | PackageManager::Pipenv | PackageManager::Pip => {
                ecosystem == Ecosystem::Python
            }
            PackageManager::Conan | PackageManager::Vcpkg => ecosystem == Ecosystem::Cpp,
        }
    }

    /// Walk the lockfile precedence list for `dir`, optionally restricted to
    /// tools that serve `ecosystem`.
    pub fn detect(dir: &Path, ecosystem: Option<Ecosystem>) -> Option<PackageManager> {
        DETECTION_ORDER
            .iter()
            .filter(|(manager, _)| ecosystem.map_or(true, |eco| manager.serves(eco)))
            .find(|(_, files)| files.iter().any(|file| dir.join(file).exists()))
            .map(|(manager, _)| *manager)
            .or_else(|| {
                // requirements-dev.txt and friends still mean pip
                let wants_python = ecosystem.map_or(true, |eco| eco == Ecosystem::Python);
                (wants_python && has_requirements_file(dir)).then_some(PackageManager::Pip)
            })
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn has_requirements_file(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| is_requirements_file(&e.file_name().to_string_lossy()))
        })
        .unwrap_or(false)
}

pub fn is_requirements_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".txt") && (lower.starts_with("requirements") || lower.ends_with("requirements.txt"))
}

/// Per-ecosystem behavior: manifest recognition, version ordering and the
/// default tooling. Selected by the `Ecosystem` tag via [`strategy`].
pub trait EcosystemStrategy: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Manifest file names that make a directory a project root.
    fn manifest_names(&self) -> &'static [&'static str];

    fn detects(&self, dir: &Path) -> bool {
        self.manifest_names().iter().any(|name| dir.join(name).is_file())
    }

    fn parse_version(&self, raw: &str) -> Option<VersionKey>;

    fn compare(&self, a: &str, b: &str) -> Option<Ordering> {
        self.parse_version(a)?.compare(&self.parse_version(b)?)
    }

    /// True only when both versions parse and `latest` is strictly newer.
    fn is_newer(&self, latest: &str, current: &str) -> bool {
        self.compare(latest, current) == Some(Ordering::Greater)
    }

    fn default_manager(&self) -> PackageManager;

    /// Tool used for the ecosystem's global scope, if it has one.
    fn global_manager(&self) -> Option<PackageManager>;

    fn detect_manager(&self, dir: &Path) -> PackageManager {
        PackageManager::detect(dir, Some(self.ecosystem())).unwrap_or_else(|| self.default_manager())
    }
}

pub struct NpmStrategy;
pub struct BunStrategy;
pub struct PythonStrategy;
pub struct CppStrategy;

fn has_bun_lockfile(dir: &Path) -> bool {
    BUN_LOCKFILES.iter().any(|lock| dir.join(lock).exists())
}

impl EcosystemStrategy for NpmStrategy {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::JsNpm
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn detects(&self, dir: &Path) -> bool {
        dir.join("package.json").is_file() && !has_bun_lockfile(dir)
    }

    fn parse_version(&self, raw: &str) -> Option<VersionKey> {
        parse_semver_like(raw)
    }

    fn default_manager(&self) -> PackageManager {
        PackageManager::Npm
    }

    fn global_manager(&self) -> Option<PackageManager> {
        Some(PackageManager::Npm)
    }
}

impl EcosystemStrategy for BunStrategy {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::JsBun
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn detects(&self, dir: &Path) -> bool {
        dir.join("package.json").is_file() && has_bun_lockfile(dir)
    }

    fn parse_version(&self, raw: &str) -> Option<VersionKey> {
        parse_semver_like(raw)
    }

    fn default_manager(&self) -> PackageManager {
        PackageManager::Bun
    }

    fn global_manager(&self) -> Option<PackageManager> {
        Some(PackageManager::Bun)
    }
}

impl EcosystemStrategy for PythonStrategy {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Python
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["requirements.txt", "pyproject.toml", "Pipfile"]
    }

    fn detects(&self, dir: &Path) -> bool {
        self.manifest_names().iter().any(|name| dir.join(name).is_file()) || has_requirements_file(dir)
    }

    fn parse_version(&self, raw: &str) -> Option<VersionKey> {
        parse_pep440(raw)
    }

    fn default_manager(&self) -> PackageManager {
        PackageManager::Pip
    }

    fn global_manager(&self) -> Option<PackageManager> {
        Some(PackageManager::Pip)
    }
}

impl EcosystemStrategy for CppStrategy {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cpp
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["vcpkg.json", "conanfile.txt", "CMakeLists.txt"]
    }

    fn parse_version(&self, raw: &str) -> Option<VersionKey> {
        parse_release(raw)
    }

    fn default_manager(&self) -> PackageManager {
        PackageManager::Vcpkg
    }

    fn global_manager(&self) -> Option<PackageManager> {
        None
    }
}

pub fn strategy(ecosystem: Ecosystem) -> &'static dyn EcosystemStrategy {
    match ecosystem {
        Ecosystem::JsNpm => &NpmStrategy,
        Ecosystem::JsBun => &BunStrategy,
        Ecosystem::Python => &PythonStrategy,
        Ecosystem::Cpp => &CppStrategy,
    }
}

/// Pick the tool for a whole-project update. Lockfiles across every
/// ecosystem are consulted before falling back to `fallback`'s default.
pub fn detect_project_manager(dir: &Path, fallback: Option<Ecosystem>) -> Option<PackageManager> {
    PackageManager::detect(dir, None).or_else(|| fallback.map(|eco| strategy(eco).default_manager()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "{}").unwrap();
    }

    #[test]
    fn test_bun_lock_outranks_npm_lock() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "package.json");
        touch(temp.path(), "package-lock.json");
        touch(temp.path(), "bun.lockb");

        assert_eq!(PackageManager::detect(temp.path(), None), Some(PackageManager::Bun));
        assert!(BunStrategy.detects(temp.path()));
        assert!(!NpmStrategy.detects(temp.path()));
    }

    #[test]
    fn test_alternate_lockfiles() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "package.json");
        touch(temp.path(), "yarn.lock");
        assert_eq!(PackageManager::detect(temp.path(), None), Some(PackageManager::Yarn));

        touch(temp.path(), "pnpm-lock.yaml");
        assert_eq!(PackageManager::detect(temp.path(), None), Some(PackageManager::Pnpm));
    }

    #[test]
    fn test_requirements_only_selects_pip() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), "requests==2.0.0\n").unwrap();

        assert_eq!(detect_project_manager(temp.path(), None), Some(PackageManager::Pip));
        assert_eq!(PythonStrategy.detect_manager(temp.path()), PackageManager::Pip);
    }

    #[test]
    fn test_restricting_by_ecosystem() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "package.json");
        touch(temp.path(), "yarn.lock");
        fs::write(temp.path().join("requirements-dev.txt"), "pytest\n").unwrap();

        assert_eq!(PackageManager::detect(temp.path(), Some(Ecosystem::Python)), Some(PackageManager::Pip));
        assert_eq!(NpmStrategy.detect_manager(temp.path()), PackageManager::Yarn);
    }

    #[test]
    fn test_fallback_to_ecosystem_default() {
        let temp = TempDir::new().unwrap();
        assert_eq!(detect_project_manager(temp.path(), Some(Ecosystem::JsNpm)), Some(PackageManager::Npm));
        assert_eq!(detect_project_manager(temp.path(), None), None);
        assert_eq!(CppStrategy.detect_manager(temp.path()), PackageManager::Vcpkg);
    }

    #[test]
    fn test_strategy_ordering() {
        assert!(strategy(Ecosystem::JsNpm).is_newer("1.3.0", "1.2.0"));
        assert!(!strategy(Ecosystem::JsNpm).is_newer("1.9.0", "2.0.0"));
        assert!(!strategy(Ecosystem::JsNpm).is_newer("1.3.0", "latest"));
        assert!(strategy(Ecosystem::Python).is_newer("2.31.0", "==2.28.1"));
        assert!(strategy(Ecosystem::Cpp).is_newer("1.3.1", "1.2.13#1"));
    }

    #[test]
    fn test_requirements_file_names() {
        assert!(is_requirements_file("requirements.txt"));
        assert!(is_requirements_file("requirements-dev.txt"));
        assert!(is_requirements_file("dev-requirements.txt"));
        assert!(!is_requirements_file("notes.txt"));
    }
}
