pub mod cpp_scanner;
pub mod global_scanner;
pub mod npm_scanner;
pub mod python_scanner;

use chrono::Utc;
use glob::Pattern;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::ecosystem::strategy;
use crate::error::{DepcatError, Result};
use crate::progress::ProgressSink;
use crate::runner::CommandRunner;
use crate::types::{Ecosystem, Package, Project, ScanResult};

pub use self::cpp_scanner::CppScanner;
pub use self::global_scanner::GlobalScanner;
pub use self::npm_scanner::NpmScanner;
pub use self::python_scanner::PythonScanner;

/// Directories that hold installed dependencies or tool state, never projects.
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".venv",
    "venv",
    "__pycache__",
    "site-packages",
    "vcpkg_installed",
    "bower_components",
    ".pnpm-store",
    ".tox",
    ".mypy_cache",
];

/// One dependency as declared (and, where possible, installed) in a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub declared: Option<String>,
    pub is_dev: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub dependencies: Vec<Dependency>,
}

/// Reads one family of manifests inside a single directory.
pub trait Scanner: Send + Sync {
    /// The ecosystem governing `dir`, if a manifest this scanner reads is there.
    fn detect(&self, dir: &Path) -> Option<Ecosystem>;

    fn scan_dir(&self, dir: &Path) -> Result<ProjectManifest>;
}

/// Produces project and package facts from disk. Never touches the catalog.
#[derive(Clone)]
pub struct ScannerEngine {
    scanners: Arc<Vec<Box<dyn Scanner>>>,
    exclude: Arc<Vec<Pattern>>,
    globals: GlobalScanner,
}

impl ScannerEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            scanners: Arc::new(vec![
                Box::new(NpmScanner::new()),
                Box::new(PythonScanner::new()),
                Box::new(CppScanner::new()),
            ]),
            exclude: Arc::new(Vec::new()),
            globals: GlobalScanner::new(runner, crate::config::default_python()),
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner)
            .with_excludes(&config.global.exclude_paths)
            .with_python(&config.global.python)
    }

    /// Invalid patterns are logged and ignored.
    pub fn with_excludes(mut self, patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        self.exclude = Arc::new(compiled);
        self
    }

    pub fn with_python(mut self, python: &str) -> Self {
        self.globals = self.globals.with_python(python);
        self
    }

    /// Recursively discover projects below `root`. Runs on the blocking pool.
    pub async fn scan_directory(
        &self,
        root: impl AsRef<Path>,
        ecosystem: Option<Ecosystem>,
        progress: ProgressSink,
    ) -> Result<ScanResult> {
        let engine = self.clone();
        let root = root.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || engine.scan_tree(&root, ecosystem, &progress)).await?
    }

    /// Treat exactly `path` as a project root. No manifest gives an empty result.
    pub async fn scan_single_project(
        &self,
        path: impl AsRef<Path>,
        ecosystem: Option<Ecosystem>,
        progress: ProgressSink,
    ) -> Result<ScanResult> {
        let engine = self.clone();
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || engine.scan_project(&path, ecosystem, &progress)).await?
    }

    /// Packages installed in one ecosystem's global scope, attached to its sentinel project.
    pub async fn scan_global_packages(&self, ecosystem: Ecosystem, progress: ProgressSink) -> Result<ScanResult> {
        let start = Instant::now();
        let Some(mut project) = Project::global(ecosystem) else {
            return Ok(ScanResult::default());
        };
        progress.message(format!("Listing {}", project.display_name()));

        let listed = self.globals.list(ecosystem).await?;
        let packages: Vec<Package> = listed
            .into_iter()
            .map(|(name, version)| Package::new(&project.path, name, ecosystem, version))
            .collect();
        project.package_count = packages.len();
        info!(ecosystem = %ecosystem, packages = packages.len(), "scanned global packages");
        progress.message(format!("Found {} global {} packages", packages.len(), ecosystem));

        Ok(ScanResult {
            projects: vec![project],
            packages_found: packages.len(),
            packages,
            duration: start.elapsed(),
            ecosystems: vec![ecosystem],
        })
    }

    /// Every global scope in turn. A missing tool is reported and skipped.
    pub async fn scan_all_global_packages(&self, progress: ProgressSink) -> ScanResult {
        let mut combined = ScanResult::default();
        for ecosystem in Ecosystem::ALL {
            if ecosystem.global_path().is_none() {
                continue;
            }
            match self.scan_global_packages(ecosystem, progress.clone()).await {
                Ok(result) => combined.merge(result),
                Err(e) => {
                    warn!(ecosystem = %ecosystem, error = %e, "global scan failed");
                    progress.message(format!("Skipping global {} packages: {}", ecosystem, e));
                }
            }
        }
        combined
    }

    pub fn scan_tree(&self, root: &Path, ecosystem: Option<Ecosystem>, progress: &ProgressSink) -> Result<ScanResult> {
        let start = Instant::now();
        let root = absolute(root)?;
        if !root.is_dir() {
            return Err(DepcatError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }
        progress.message(format!("Scanning {}", root.display()));

        let mut found: Vec<(Project, Vec<Package>)> = Vec::new();
        let mut cpp_roots: Vec<PathBuf> = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || (e.file_type().is_dir() && !self.is_skipped(&root, e)));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let location = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!(path = %location, error = %e, "cannot read directory");
                    progress.message(format!("Cannot read {}: {}", location, e));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();

            // a bare CMakeLists.txt below another C++ root belongs to that build
            let nested_cmake = cpp_scanner::is_cmake_only(dir)
                && cpp_roots.iter().any(|r| dir.starts_with(r) && dir != r.as_path());
            let skip: &[Ecosystem] = if nested_cmake { &[Ecosystem::Cpp] } else { &[] };
            if !nested_cmake && strategy(Ecosystem::Cpp).detects(dir) {
                cpp_roots.push(dir.to_path_buf());
            }

            if let Some((project, packages)) = self.scan_dir(dir, ecosystem, skip, progress) {
                progress.message(format!(
                    "Found {} project {} ({} packages)",
                    project.ecosystem,
                    project.path,
                    packages.len()
                ));
                found.push((project, packages));
            }
        }

        let groups = assign_groups(&root, &mut found);
        let mut result = ScanResult {
            projects: groups,
            ecosystems: ecosystem.map_or_else(|| Ecosystem::ALL.to_vec(), |e| vec![e]),
            ..Default::default()
        };
        for (project, packages) in found {
            result.projects.push(project);
            result.packages.extend(packages);
        }
        result.packages_found = result.packages.len();
        result.duration = start.elapsed();

        info!(
            root = %root.display(),
            projects = result.projects.len(),
            packages = result.packages_found,
            "scan complete"
        );
        progress.message(format!(
            "Found {} projects with {} packages in {:.1}s",
            result.projects.len(),
            result.packages_found,
            result.duration.as_secs_f64()
        ));
        Ok(result)
    }

    pub fn scan_project(&self, path: &Path, ecosystem: Option<Ecosystem>, progress: &ProgressSink) -> Result<ScanResult> {
        let start = Instant::now();
        let dir = absolute(path)?;
        let mut result = ScanResult {
            ecosystems: ecosystem.map_or_else(|| Ecosystem::ALL.to_vec(), |e| vec![e]),
            ..Default::default()
        };

        match self.scan_dir(&dir, ecosystem, &[], progress) {
            Some((project, packages)) => {
                progress.message(format!("Rescanned {} ({} packages)", project.path, packages.len()));
                result.projects.push(project);
                result.packages = packages;
            }
            None => {
                debug!(path = %dir.display(), "no recognised manifest");
                progress.message(format!("No manifest found in {}", dir.display()));
            }
        }
        result.packages_found = result.packages.len();
        result.duration = start.elapsed();
        Ok(result)
    }

    fn is_skipped(&self, root: &Path, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if SKIPPED_DIRS.contains(&&*name) {
            return true;
        }
        // virtualenvs under any name
        if entry.path().join("pyvenv.cfg").is_file() {
            return true;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        self.exclude
            .iter()
            .any(|pattern| pattern.matches(&name) || pattern.matches_path(relative))
    }

    /// Run every scanner that recognises `dir`. The project takes the first
    /// detected ecosystem; each package keeps the ecosystem it was found under.
    fn scan_dir(
        &self,
        dir: &Path,
        wanted: Option<Ecosystem>,
        skip: &[Ecosystem],
        progress: &ProgressSink,
    ) -> Option<(Project, Vec<Package>)> {
        let path = dir.to_string_lossy().to_string();
        let mut project: Option<Project> = None;
        let mut packages: Vec<Package> = Vec::new();

        for scanner in self.scanners.iter() {
            let Some(detected) = scanner.detect(dir) else {
                continue;
            };
            if skip.contains(&detected) || wanted.map_or(false, |w| w != detected) {
                continue;
            }

            let manifest = match scanner.scan_dir(dir) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %path, ecosystem = %detected, error = %e, "skipping manifest");
                    progress.message(format!("Skipping {} manifest in {}: {}", detected, path, e));
                    continue;
                }
            };

            let project = project.get_or_insert_with(|| {
                let name = manifest
                    .name
                    .clone()
                    .or_else(|| dir.file_name().map(|n| n.to_string_lossy().to_string()))
                    .unwrap_or_else(|| path.clone());
                Project::new(&path, name, detected)
            });
            for dependency in manifest.dependencies {
                if packages.iter().any(|p| p.name == dependency.name) {
                    continue;
                }
                let mut package = Package::new(&project.path, dependency.name, detected, dependency.version)
                    .dev(dependency.is_dev);
                package.declared = dependency.declared;
                packages.push(package);
            }
        }

        let mut project = project?;
        project.package_count = packages.len();
        project.last_scanned = Some(Utc::now());
        project.is_git_repo = dir.join(".git").exists();
        Some((project, packages))
    }
}

/// A non-project directory strictly below `root` with two or more project
/// roots as immediate children becomes a group for those children.
fn assign_groups(root: &Path, found: &mut [(Project, Vec<Package>)]) -> Vec<Project> {
    let roots: HashSet<PathBuf> = found.iter().map(|(p, _)| PathBuf::from(&p.path)).collect();
    let mut by_parent: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();

    for (index, (project, _)) in found.iter().enumerate() {
        let path = PathBuf::from(&project.path);
        let Some(parent) = path.parent() else {
            continue;
        };
        if parent != root && parent.starts_with(root) && !roots.contains(parent) {
            by_parent.entry(parent.to_path_buf()).or_default().push(index);
        }
    }

    let mut groups = Vec::new();
    for (parent, members) in by_parent.into_iter().filter(|(_, m)| m.len() >= 2) {
        let name = parent
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| parent.to_string_lossy().to_string());
        let mut group = Project::new(parent.to_string_lossy(), name, found[members[0]].0.ecosystem);
        group.is_group = true;
        group.last_scanned = Some(Utc::now());
        group.is_git_repo = parent.join(".git").exists();

        for index in members {
            let member = &mut found[index].0;
            member.parent_path = Some(group.path.clone());
            group.package_count += member.package_count;
        }
        groups.push(group);
    }
    groups
}

/// Canonical form of a user-supplied path, without the Windows verbatim prefix.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let canonical = path.canonicalize()?;
    let text = canonical.to_string_lossy();
    Ok(match text.strip_prefix(r"\\?\") {
        Some(stripped) => PathBuf::from(stripped),
        None => canonical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;
    use crate::runner::CommandOutput;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> ScannerEngine {
        ScannerEngine::new(Arc::new(FakeRunner::new()))
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn root(temp: &TempDir) -> PathBuf {
        absolute(temp.path()).unwrap()
    }

    fn path_of(dir: &Path) -> String {
        dir.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_bun_lockfile_classifies_project() {
        let temp = TempDir::new().unwrap();
        let app = root(&temp).join("app");
        write(&app.join("package.json"), r#"{"dependencies": {"hono": "^4.0.0"}}"#);
        write(&app.join("bun.lockb"), "");

        let result = engine()
            .scan_directory(temp.path(), None, ProgressSink::silent())
            .await
            .unwrap();

        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].ecosystem, Ecosystem::JsBun);
        assert_eq!(result.packages[0].ecosystem, Ecosystem::JsBun);

        let npm_only = engine()
            .scan_directory(temp.path(), Some(Ecosystem::JsNpm), ProgressSink::silent())
            .await
            .unwrap();
        assert!(npm_only.is_empty());
    }

    #[tokio::test]
    async fn test_node_modules_not_descended() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("web/package.json"), r#"{"dependencies": {"left-pad": "1.3.0"}}"#);
        write(&base.join("web/node_modules/left-pad/package.json"), r#"{"name": "left-pad", "version": "1.3.0", "dependencies": {"x": "1.0.0"}}"#);

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].path, path_of(&base.join("web")));
        assert_eq!(result.packages_found, 1);
    }

    #[tokio::test]
    async fn test_malformed_manifest_does_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("broken/package.json"), "{ not json");
        write(&base.join("good/requirements.txt"), "requests==2.31.0\n");

        let (sink, mut rx) = ProgressSink::channel();
        let result = engine().scan_tree(&base, None, &sink).unwrap();
        drop(sink);

        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].path, path_of(&base.join("good")));
        assert_eq!(result.packages[0].name, "requests");

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            messages.push(format!("{:?}", event));
        }
        assert!(messages.iter().any(|m| m.contains("Skipping npm manifest")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_sibling_still_yields_facts() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("locked/package.json"), r#"{"dependencies": {"a": "1.0.0"}}"#);
        write(&base.join("open/package.json"), r#"{"dependencies": {"b": "2.0.0"}}"#);
        fs::set_permissions(base.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(base.join("locked")).is_ok() {
            // permissions do not bind this user (root)
            fs::set_permissions(base.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = engine().scan_tree(&base, None, &ProgressSink::silent());
        fs::set_permissions(base.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        let result = result.unwrap();
        let open = path_of(&base.join("open"));
        assert!(result.projects.iter().any(|p| p.path == open));
        assert!(result.packages.iter().any(|p| p.project_path == open && p.name == "b"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_and_looping_links_do_not_stop_the_walk() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("open/package.json"), r#"{"dependencies": {"b": "2.0.0"}}"#);
        symlink(base.join("gone"), base.join("ghost")).unwrap();
        symlink(&base, base.join("open/loop")).unwrap();

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();

        let open = path_of(&base.join("open"));
        let projects: Vec<&str> = result.projects.iter().filter(|p| !p.is_group).map(|p| p.path.as_str()).collect();
        assert_eq!(projects, vec![open.as_str()]);
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.packages[0].name, "b");
    }

    #[tokio::test]
    async fn test_empty_project_has_zero_packages() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("empty/package.json"), r#"{"name": "empty"}"#);

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].package_count, 0);
        assert!(result.packages.is_empty());
    }

    #[tokio::test]
    async fn test_groups_precede_members() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("work/api/requirements.txt"), "flask==3.0.0\nrequests==2.31.0\n");
        write(&base.join("work/site/package.json"), r#"{"dependencies": {"vue": "3.4.0"}}"#);
        write(&base.join("solo/package.json"), r#"{"dependencies": {"zod": "3.22.0"}}"#);

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        let group_path = path_of(&base.join("work"));

        assert!(result.projects[0].is_group);
        assert_eq!(result.projects[0].path, group_path);
        assert_eq!(result.projects[0].package_count, 3);
        assert_eq!(result.projects.len(), 4);

        for project in &result.projects[1..] {
            let expected = if project.path.starts_with(&group_path) { Some(group_path.clone()) } else { None };
            assert_eq!(project.parent_path, expected);
        }
    }

    #[tokio::test]
    async fn test_scan_root_is_never_a_group() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("a/package.json"), "{}");
        write(&base.join("b/package.json"), "{}");

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        assert!(result.projects.iter().all(|p| !p.is_group && p.parent_path.is_none()));
    }

    #[tokio::test]
    async fn test_nested_cmake_is_not_a_new_project() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("engine/vcpkg.json"), r#"{"dependencies": ["fmt"]}"#);
        write(&base.join("engine/CMakeLists.txt"), "find_package(fmt)\n");
        write(&base.join("engine/src/render/CMakeLists.txt"), "find_package(glm)\n");

        let result = engine().scan_tree(&base, Some(Ecosystem::Cpp), &ProgressSink::silent()).unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].path, path_of(&base.join("engine")));
    }

    #[tokio::test]
    async fn test_exclude_patterns() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("vendor/lib/package.json"), r#"{"dependencies": {"a": "1.0.0"}}"#);
        write(&base.join("app/package.json"), r#"{"dependencies": {"b": "1.0.0"}}"#);

        let engine = engine().with_excludes(&["vendor".to_string(), "[".to_string()]);
        let result = engine.scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].name, "app");
    }

    #[tokio::test]
    async fn test_mixed_directory_is_one_project() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("tool/package.json"), r#"{"name": "tool", "devDependencies": {"eslint": "8.56.0"}}"#);
        write(&base.join("tool/requirements.txt"), "pyyaml==6.0.1\n");

        let result = engine().scan_tree(&base, None, &ProgressSink::silent()).unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].ecosystem, Ecosystem::JsNpm);
        assert_eq!(result.projects[0].package_count, 2);

        let pyyaml = result.packages.iter().find(|p| p.name == "pyyaml").unwrap();
        assert_eq!(pyyaml.ecosystem, Ecosystem::Python);
        let eslint = result.packages.iter().find(|p| p.name == "eslint").unwrap();
        assert!(eslint.is_dev);
    }

    #[tokio::test]
    async fn test_single_project_without_manifest_is_empty() {
        let temp = TempDir::new().unwrap();

        let result = engine()
            .scan_single_project(temp.path(), None, ProgressSink::silent())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.packages_found, 0);
    }

    #[tokio::test]
    async fn test_single_project_is_forced_as_root() {
        let temp = TempDir::new().unwrap();
        let base = root(&temp);
        write(&base.join("node_modules/dep/package.json"), r#"{"name": "dep", "version": "1.0.0"}"#);
        write(&base.join("package.json"), r#"{"name": "forced", "dependencies": {"dep": "^1.0.0"}}"#);
        fs::create_dir(base.join(".git")).unwrap();

        let result = engine()
            .scan_single_project(&base, None, ProgressSink::silent())
            .await
            .unwrap();
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].name, "forced");
        assert!(result.projects[0].is_git_repo);
        assert_eq!(result.packages[0].version, "1.0.0");
    }

    #[tokio::test]
    async fn test_global_scan_attaches_to_sentinel() {
        let runner = Arc::new(FakeRunner::new().respond(CommandOutput::ok(
            r#"{"dependencies": {"pnpm": {"version": "8.15.1"}}}"#,
        )));
        let engine = ScannerEngine::new(runner);

        let result = engine
            .scan_global_packages(Ecosystem::JsNpm, ProgressSink::silent())
            .await
            .unwrap();
        assert_eq!(result.projects[0].path, "::global::npm");
        assert_eq!(result.projects[0].package_count, 1);
        assert_eq!(result.packages[0].project_path, "::global::npm");
        assert_eq!(result.packages[0].version, "8.15.1");
    }

    #[tokio::test]
    async fn test_all_globals_skip_failing_tools() {
        let runner = Arc::new(
            FakeRunner::new()
                .respond(CommandOutput::failed(127, "npm: not found"))
                .respond(CommandOutput::ok("/g node_modules (1)\n└── typescript@5.3.3\n"))
                .respond(CommandOutput::ok(r#"[{"name": "pip", "version": "24.0"}]"#)),
        );
        let engine = ScannerEngine::new(runner);

        let result = engine.scan_all_global_packages(ProgressSink::silent()).await;
        let paths: Vec<&str> = result.projects.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["::global::bun", "::global::python"]);
        assert_eq!(result.packages_found, 2);
    }
}
