use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod manifest_edit;

use self::commands::Scope;
use self::manifest_edit::ManifestBackup;
use crate::catalog::CatalogStore;
use crate::ecosystem::{detect_project_manager, strategy, PackageManager};
use crate::error::DepcatError;
use crate::progress::ProgressSink;
use crate::runner::{CommandLine, CommandRunner};
use crate::scanner::{PythonScanner, ScannerEngine};
use crate::sources::SourceRegistry;
use crate::types::{
    BatchSummary, Ecosystem, Package, ProjectUpdateResult, ScanResult, UpdateResult, Verification, VersionCheck,
};

/// How a manifest is rewritten before conan or vcpkg re-resolve it.
#[derive(Debug, Clone, Copy)]
enum ManifestChange<'a> {
    Pin(&'a str),
    Remove,
}

/// Staleness checks and update/uninstall actions, always followed by a
/// rescan of the affected scope so the catalog reflects what is on disk.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    catalog: CatalogStore,
    scanner: ScannerEngine,
    sources: SourceRegistry,
    runner: Arc<dyn CommandRunner>,
    python: String,
}

impl UpdateOrchestrator {
    pub fn new(
        catalog: CatalogStore,
        scanner: ScannerEngine,
        sources: SourceRegistry,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            catalog,
            scanner,
            sources,
            runner,
            python: crate::config::default_python(),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// One registry lookup per package, in order. Results are written to the
    /// catalog as they arrive; a failed lookup marks only that package.
    pub async fn check_for_updates(&self, packages: &[Package], progress: &ProgressSink) -> Vec<VersionCheck> {
        let total = packages.len();
        let mut checks = Vec::with_capacity(total);

        for (index, package) in packages.iter().enumerate() {
            progress.item(index + 1, total, &package.name);
            let check = self.check_one(package).await;

            if let Err(e) = self.catalog.update_package_version_info(
                &package.project_path,
                &package.name,
                check.latest_version.as_deref(),
                check.not_found,
            ) {
                warn!(package = %package.name, error = %e, "could not record version check");
            }
            checks.push(check);
        }

        let outdated = checks.iter().filter(|c| c.is_outdated).count();
        let not_found = checks.iter().filter(|c| c.not_found).count();
        info!(checked = total, outdated, not_found, "update check finished");
        progress.message(format!(
            "Checked {} packages: {} outdated, {} not found",
            total, outdated, not_found
        ));
        checks
    }

    async fn check_one(&self, package: &Package) -> VersionCheck {
        let lookup = match self.sources.get_source(package.ecosystem) {
            Some(source) => source.lookup(&package.name).await,
            None => Err(anyhow::anyhow!("no registry configured for {}", package.ecosystem)),
        };

        match lookup {
            Ok(info) => {
                let is_outdated = strategy(package.ecosystem).is_newer(&info.latest_version, &package.version);
                if let Err(e) =
                    self.catalog
                        .update_package_metadata(&package.project_path, &package.name, &info.metadata)
                {
                    warn!(package = %package.name, error = %e, "could not record package metadata");
                }
                VersionCheck {
                    package: package.clone(),
                    latest_version: Some(info.latest_version),
                    is_outdated,
                    not_found: false,
                }
            }
            Err(e) => {
                let err = DepcatError::RegistryLookup {
                    package: package.name.clone(),
                    message: format!("{:#}", e),
                };
                warn!(project = %package.project_path, "{}", err);
                VersionCheck {
                    package: package.clone(),
                    latest_version: None,
                    is_outdated: false,
                    not_found: true,
                }
            }
        }
    }

    /// Move one package to `target` (default: its latest known version).
    /// Never fails past this boundary; failures come back in the result.
    pub async fn update_package(&self, package: &Package, target: Option<&str>, progress: &ProgressSink) -> UpdateResult {
        let Some((manager, scope, dir)) = self.tooling(package) else {
            return UpdateResult::failed(package, format!("no tool manages global {} packages", package.ecosystem));
        };
        let version = match self.resolve_target(package, target).await {
            Ok(version) => version,
            Err(message) => {
                warn!(package = %package.name, "{}", message);
                return UpdateResult::failed(package, message);
            }
        };

        info!(
            package = %package.name,
            project = %package.project_path,
            from = %package.version,
            to = %version,
            manager = %manager,
            "updating package"
        );
        progress.message(format!(
            "Updating {} {} -> {} with {}",
            package.name, package.version, version, manager
        ));

        let backups = match self.edit_manifest(manager, dir.as_deref(), &package.name, ManifestChange::Pin(&version)) {
            Ok(backups) => backups,
            Err(message) => return UpdateResult::failed(package, message),
        };
        let python = self.interpreter(dir.as_deref());
        let install = commands::install(manager, &python, &package.name, &version, package.is_dev, scope);
        if let Err(message) = self.run_all(manager, &install, dir.as_deref(), progress).await {
            restore(backups);
            return UpdateResult::failed(package, message);
        }

        let (new_version, verification) = self.reconcile(package, &version, progress).await;
        if verification == Verification::Verified && new_version != version && new_version == package.version {
            let message = format!(
                "{} exited cleanly but {} is still at {}",
                manager, package.name, new_version
            );
            warn!(package = %package.name, project = %package.project_path, "{}", message);
            restore(backups);
            self.refresh(package, progress).await;
            return UpdateResult {
                verification,
                ..UpdateResult::failed(package, message)
            };
        }
        backups.into_iter().for_each(ManifestBackup::commit);

        UpdateResult {
            project_path: package.project_path.clone(),
            name: package.name.clone(),
            success: true,
            old_version: package.version.clone(),
            new_version: Some(new_version),
            error_message: None,
            verification,
        }
    }

    /// Sequential: each update finishes and is reconciled before the next starts.
    pub async fn update_packages(&self, packages: &[Package], progress: &ProgressSink) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (index, package) in packages.iter().enumerate() {
            progress.item(index + 1, packages.len(), &package.name);
            summary.push(self.update_package(package, None, progress).await);
        }
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "batch update finished"
        );
        summary
    }

    /// Remove one package with its native tool. Errors are logged, not returned.
    pub async fn uninstall_package(&self, package: &Package, progress: &ProgressSink) -> bool {
        let Some((manager, scope, dir)) = self.tooling(package) else {
            error!(package = %package.name, ecosystem = %package.ecosystem, "no tool manages this global scope");
            return false;
        };
        progress.message(format!("Removing {} with {}", package.name, manager));

        let backups = match self.edit_manifest(manager, dir.as_deref(), &package.name, ManifestChange::Remove) {
            Ok(backups) => backups,
            Err(message) => {
                error!(package = %package.name, "{}", message);
                return false;
            }
        };
        let python = self.interpreter(dir.as_deref());
        let uninstall = commands::uninstall(manager, &python, &package.name, package.is_dev, scope);
        if let Err(message) = self.run_all(manager, &uninstall, dir.as_deref(), progress).await {
            restore(backups);
            error!(package = %package.name, project = %package.project_path, "uninstall failed: {}", message);
            return false;
        }
        backups.into_iter().for_each(ManifestBackup::commit);

        let removed = self
            .catalog
            .delete_package(&package.project_path, &package.name)
            .and_then(|_| self.catalog.refresh_package_count(&package.project_path));
        if let Err(e) = removed {
            warn!(package = %package.name, error = %e, "uninstalled but catalog not updated");
        }
        info!(package = %package.name, project = %package.project_path, "package removed");
        true
    }

    /// Run the governing tool's bulk update for a whole project, then rescan it.
    pub async fn update_project(&self, path: &str, progress: &ProgressSink) -> ProjectUpdateResult {
        if let Some(ecosystem) = Ecosystem::from_global_path(path) {
            return self.update_global_scope(ecosystem, progress).await;
        }

        let dir = Path::new(path);
        if !dir.is_dir() {
            return project_failure(path, None, format!("{} is not a directory", path));
        }
        let fallback = match self.catalog.get_project(path) {
            Ok(Some(project)) if project.is_group => {
                return project_failure(path, None, format!("{} is a group; update its projects one by one", path));
            }
            Ok(Some(project)) => Some(project.ecosystem),
            _ => Ecosystem::ALL.into_iter().find(|e| strategy(*e).detects(dir)),
        };
        let Some(manager) = detect_project_manager(dir, fallback) else {
            return project_failure(path, None, format!("no package manager detected in {}", path));
        };

        let bulk = match commands::bulk_update(manager, &self.interpreter(Some(dir)), dir) {
            Ok(bulk) => bulk,
            Err(message) => return project_failure(path, Some(manager), message),
        };
        info!(project = %path, manager = %manager, "updating project");
        progress.message(format!("Updating {} with {}", path, manager));
        if let Err(message) = self.run_all(manager, &bulk, Some(dir), progress).await {
            return project_failure(path, Some(manager), message);
        }

        let rescan = self.scanner.scan_single_project(dir, None, progress.clone()).await;
        let details = self.apply_rescan(path, manager, rescan);
        ProjectUpdateResult {
            project_path: path.to_string(),
            manager: Some(manager),
            success: true,
            details,
            error_message: None,
        }
    }

    async fn update_global_scope(&self, ecosystem: Ecosystem, progress: &ProgressSink) -> ProjectUpdateResult {
        let path = ecosystem.global_path().unwrap_or_default();
        let Some(manager) = strategy(ecosystem).global_manager() else {
            return project_failure(path, None, format!("{} has no global scope", ecosystem));
        };
        let Some(command) = commands::global_bulk_update(manager) else {
            return project_failure(
                path,
                Some(manager),
                format!("{} has no bulk update for global packages; update them one at a time", manager),
            );
        };

        progress.message(format!("Updating global {} packages", ecosystem));
        if let Err(message) = self.run_all(manager, &[command], None, progress).await {
            return project_failure(path, Some(manager), message);
        }

        let rescan = self.scanner.scan_global_packages(ecosystem, progress.clone()).await;
        let details = self.apply_rescan(path, manager, rescan);
        ProjectUpdateResult {
            project_path: path.to_string(),
            manager: Some(manager),
            success: true,
            details,
            error_message: None,
        }
    }

    fn apply_rescan(&self, path: &str, manager: PackageManager, rescan: crate::error::Result<ScanResult>) -> String {
        match rescan {
            Ok(result) if !result.projects.is_empty() => match self.catalog.apply_scan(&result) {
                Ok(report) => format!("{} updated {}; {} packages rescanned", manager, path, report.packages),
                Err(e) => {
                    warn!(project = %path, error = %e, "rescan could not be stored");
                    format!("{} updated {}; catalog refresh failed: {}", manager, path, e)
                }
            },
            Ok(_) => {
                warn!(project = %path, "rescan after project update found no manifest");
                format!("{} updated {}; rescan found no manifest", manager, path)
            }
            Err(e) => {
                warn!(project = %path, error = %e, "rescan after project update failed");
                format!("{} updated {}; rescan failed: {}", manager, path, e)
            }
        }
    }

    /// Tool, scope and working directory for a package's update commands.
    fn tooling(&self, package: &Package) -> Option<(PackageManager, Scope, Option<PathBuf>)> {
        let strategy = strategy(package.ecosystem);
        if package.is_global() {
            strategy.global_manager().map(|manager| (manager, Scope::Global, None))
        } else {
            let dir = PathBuf::from(&package.project_path);
            Some((strategy.detect_manager(&dir), Scope::Project, Some(dir)))
        }
    }

    /// A project's own virtualenv wins over the configured interpreter.
    fn interpreter(&self, dir: Option<&Path>) -> String {
        dir.and_then(PythonScanner::venv_python)
            .map(|python| python.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.python.clone())
    }

    async fn resolve_target(&self, package: &Package, target: Option<&str>) -> Result<String, String> {
        let known = target
            .or(package.latest_version.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(version) = known {
            return Ok(version.to_string());
        }

        let source = self
            .sources
            .get_source(package.ecosystem)
            .ok_or_else(|| format!("no registry configured for {}", package.ecosystem))?;
        source.lookup(&package.name).await.map(|info| info.latest_version).map_err(|e| {
            DepcatError::RegistryLookup {
                package: package.name.clone(),
                message: format!("{:#}", e),
            }
            .to_string()
        })
    }

    /// Rewrite the manifests a tool resolves from. Backups restore the
    /// originals unless committed.
    fn edit_manifest(
        &self,
        manager: PackageManager,
        dir: Option<&Path>,
        name: &str,
        change: ManifestChange<'_>,
    ) -> Result<Vec<ManifestBackup>, String> {
        let Some(dir) = dir else {
            return Ok(Vec::new());
        };
        let files = match manager {
            PackageManager::Conan if !dir.join("conanfile.txt").is_file() => {
                return Err("conanfile.py recipes are not edited automatically".to_string());
            }
            PackageManager::Conan => vec![dir.join("conanfile.txt")],
            PackageManager::Vcpkg => vec![dir.join("vcpkg.json")],
            PackageManager::Pip => commands::requirement_files(dir)
                .into_iter()
                .map(|file| dir.join(file))
                .collect(),
            _ => return Ok(Vec::new()),
        };

        let mut backups = Vec::new();
        for path in files {
            let edited = manifest_edit::edit_file(&path, |c| match (manager, change) {
                (PackageManager::Conan, ManifestChange::Pin(version)) => {
                    Ok(Some(manifest_edit::set_conan_require(c, name, version)))
                }
                (PackageManager::Conan, ManifestChange::Remove) => Ok(manifest_edit::remove_conan_require(c, name)),
                (PackageManager::Vcpkg, ManifestChange::Pin(version)) => {
                    manifest_edit::set_vcpkg_override(c, name, version).map(Some)
                }
                (PackageManager::Vcpkg, ManifestChange::Remove) => manifest_edit::remove_vcpkg_dependency(c, name),
                (_, ManifestChange::Pin(version)) => Ok(manifest_edit::pin_requirement(c, name, version)),
                (_, ManifestChange::Remove) => Ok(manifest_edit::remove_requirement(c, name)),
            })
            .map_err(|e| format!("{:#}", e))?;
            backups.extend(edited);
        }
        Ok(backups)
    }

    /// Run commands in order, stopping at the first failure. Output is only
    /// judged once a command has exited.
    async fn run_all(
        &self,
        manager: PackageManager,
        commands: &[CommandLine],
        cwd: Option<&Path>,
        progress: &ProgressSink,
    ) -> Result<(), String> {
        for command in commands {
            progress.message(format!("Running {}", command));
            let failure = match self.runner.run(command, cwd).await {
                Ok(output) => match commands::failure_message(manager, &output) {
                    Some(message) => {
                        error!(command = %command, stderr = %output.stderr.trim(), "external tool failed");
                        Some(message)
                    }
                    None => None,
                },
                Err(e) => {
                    error!(command = %command, error = %e, "could not start external tool");
                    Some(e.to_string())
                }
            };
            if let Some(message) = failure {
                return Err(DepcatError::ExternalTool {
                    command: command.to_string(),
                    message,
                }
                .to_string());
            }
            debug!(command = %command, "external tool succeeded");
        }
        Ok(())
    }

    /// Rescan the package's scope and store what is really installed. A miss
    /// falls back to trusting `reported` and is flagged as degraded.
    async fn reconcile(&self, package: &Package, reported: &str, progress: &ProgressSink) -> (String, Verification) {
        let scan = self.rescan(package, progress).await;

        let observed = scan.as_ref().ok().and_then(|result| {
            result
                .packages
                .iter()
                .find(|p| p.project_path == package.project_path && p.name == package.name)
                .map(|p| p.version.clone())
        });

        match (scan, observed) {
            (Ok(result), Some(version)) => match self.catalog.apply_scan(&result) {
                Ok(_) => {
                    debug!(package = %package.name, version = %version, "update verified on disk");
                    (version, Verification::Verified)
                }
                Err(e) => {
                    warn!(package = %package.name, error = %e, "verified update could not be stored");
                    self.degrade(package, reported, progress)
                }
            },
            (scan, _) => {
                let miss = DepcatError::ReconciliationMiss {
                    project: package.project_path.clone(),
                    package: package.name.clone(),
                };
                warn!(
                    project = %package.project_path,
                    package = %package.name,
                    scan_error = ?scan.err().map(|e| e.to_string()),
                    "{}; trusting reported version",
                    miss
                );
                self.degrade(package, reported, progress)
            }
        }
    }

    async fn rescan(&self, package: &Package, progress: &ProgressSink) -> crate::error::Result<ScanResult> {
        if package.is_global() {
            self.scanner.scan_global_packages(package.ecosystem, progress.clone()).await
        } else {
            self.scanner
                .scan_single_project(&package.project_path, None, progress.clone())
                .await
        }
    }

    /// Store what is on disk after manifests were put back.
    async fn refresh(&self, package: &Package, progress: &ProgressSink) {
        let stored = match self.rescan(package, progress).await {
            Ok(result) => self.catalog.apply_scan(&result).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(package = %package.name, error = %e, "could not refresh catalog after restoring manifests");
        }
    }

    fn degrade(&self, package: &Package, reported: &str, progress: &ProgressSink) -> (String, Verification) {
        progress.message(format!(
            "{} marked as {} without verification",
            package.name, reported
        ));
        if let Err(e) = self
            .catalog
            .mark_package_as_updated(&package.project_path, &package.name, reported)
        {
            error!(package = %package.name, error = %e, "could not mark package as updated");
        }
        (reported.to_string(), Verification::Degraded)
    }
}

fn restore(backups: Vec<ManifestBackup>) {
    for backup in backups.into_iter().rev() {
        if let Err(e) = backup.restore() {
            error!(error = %e, "manifest left modified after a failed command");
        }
    }
}

fn project_failure(path: &str, manager: Option<PackageManager>, message: String) -> ProjectUpdateResult {
    warn!(project = %path, "{}", message);
    ProjectUpdateResult {
        project_path: path.to_string(),
        manager,
        success: false,
        details: String::new(),
        error_message: Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::FakeRunner;
    use crate::runner::CommandOutput;
    use crate::sources::testing::FakeSource;
    use crate::sources::Source;
    use crate::types::Project;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    struct Harness {
        orchestrator: UpdateOrchestrator,
        runner: Arc<FakeRunner>,
        catalog: CatalogStore,
    }

    fn harness(runner: FakeRunner, source: FakeSource) -> Harness {
        let runner = Arc::new(runner);
        let catalog = CatalogStore::open_in_memory().unwrap();
        let source: Arc<dyn Source> = Arc::new(source);
        let mut sources = SourceRegistry::new();
        for ecosystem in Ecosystem::ALL {
            sources = sources.with_source(ecosystem, source.clone());
        }
        let orchestrator = UpdateOrchestrator::new(
            catalog.clone(),
            ScannerEngine::new(runner.clone()),
            sources,
            runner.clone(),
        )
        .with_python("python3");
        Harness {
            orchestrator,
            runner,
            catalog,
        }
    }

    /// Scan `dir` into the catalog and return the stored package.
    async fn catalogued(h: &Harness, dir: &Path, name: &str) -> Package {
        let scan = h
            .orchestrator
            .scanner
            .scan_single_project(dir, None, ProgressSink::silent())
            .await
            .unwrap();
        h.catalog.apply_scan(&scan).unwrap();
        let project = &scan.projects[0].path;
        h.catalog.get_package(project, name).unwrap().unwrap()
    }

    fn write_package_json(dir: &Path, deps: &str) {
        fs::write(dir.join("package.json"), format!(r#"{{"dependencies": {{{}}}}}"#, deps)).unwrap();
    }

    #[tokio::test]
    async fn test_check_for_updates_orders_versions() {
        let h = harness(
            FakeRunner::new(),
            FakeSource::new().with("minor-bump", "1.3.0").with("ahead", "1.9.0"),
        );
        h.catalog.upsert_project(&Project::new("/code/web", "web", Ecosystem::JsNpm)).unwrap();
        let packages = vec![
            Package::new("/code/web", "minor-bump", Ecosystem::JsNpm, "1.2.0"),
            Package::new("/code/web", "ahead", Ecosystem::JsNpm, "2.0.0"),
            Package::new("/code/web", "vanished", Ecosystem::JsNpm, "0.1.0"),
        ];
        for package in &packages {
            h.catalog.upsert_package(package).unwrap();
        }

        let checks = h.orchestrator.check_for_updates(&packages, &ProgressSink::silent()).await;

        assert!(checks[0].is_outdated);
        assert_eq!(checks[0].latest_version.as_deref(), Some("1.3.0"));
        assert!(!checks[1].is_outdated);
        assert!(checks[2].not_found);
        assert!(!checks[2].is_outdated);

        let stored = h.catalog.get_package("/code/web", "minor-bump").unwrap().unwrap();
        assert!(stored.is_outdated);
        assert_eq!(stored.metadata.license.as_deref(), Some("MIT"));
        assert!(stored.last_checked.is_some());
        let missing = h.catalog.get_package("/code/web", "vanished").unwrap().unwrap();
        assert!(missing.not_found);
        assert!(!missing.is_outdated);
    }

    #[tokio::test]
    async fn test_check_reports_item_progress() {
        let h = harness(FakeRunner::new(), FakeSource::new().with("a", "1.0.0"));
        let packages = vec![
            Package::new("/p", "a", Ecosystem::Python, "1.0.0"),
            Package::new("/p", "b", Ecosystem::Python, "1.0.0"),
        ];

        let (sink, mut rx) = ProgressSink::channel();
        h.orchestrator.check_for_updates(&packages, &sink).await;
        drop(sink);

        let mut items = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let crate::progress::Progress::Item { current, total, name } = event {
                items.push((current, total, name));
            }
        }
        assert_eq!(items, vec![(1, 2, "a".to_string()), (2, 2, "b".to_string())]);
    }

    #[tokio::test]
    async fn test_update_project_with_requirements_uses_pip() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), "flask==3.0.0\n").unwrap();
        let h = harness(FakeRunner::new(), FakeSource::new());
        let path = temp.path().to_string_lossy().to_string();

        let result = h.orchestrator.update_project(&path, &ProgressSink::silent()).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.manager, Some(PackageManager::Pip));
        let commands = h.runner.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program, "python3");
        assert_eq!(commands[0].args, vec!["-m", "pip", "install", "--upgrade", "-r", "requirements.txt"]);
        assert!(!commands.iter().any(|c| matches!(c.program.as_str(), "npm" | "yarn" | "pnpm" | "bun")));
    }

    #[tokio::test]
    async fn test_update_project_prefers_bun_lock() {
        let temp = TempDir::new().unwrap();
        write_package_json(temp.path(), r#""hono": "4.0.0""#);
        fs::write(temp.path().join("bun.lockb"), "").unwrap();
        fs::write(temp.path().join("package-lock.json"), "{}").unwrap();
        let h = harness(FakeRunner::new(), FakeSource::new());

        let result = h
            .orchestrator
            .update_project(&temp.path().to_string_lossy(), &ProgressSink::silent())
            .await;
        assert_eq!(result.manager, Some(PackageManager::Bun));
        assert_eq!(h.runner.commands()[0].to_string(), "bun update");
    }

    #[tokio::test]
    async fn test_update_project_missing_directory() {
        let h = harness(FakeRunner::new(), FakeSource::new());
        let result = h
            .orchestrator
            .update_project("/definitely/not/here", &ProgressSink::silent())
            .await;
        assert!(!result.success);
        assert!(h.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_catalog_version() {
        let temp = TempDir::new().unwrap();
        write_package_json(temp.path(), r#""left-pad": "1.0.0""#);
        let h = harness(
            FakeRunner::new().respond(CommandOutput::failed(1, "npm ERR! 404 Not Found - left-pad@9.9.9")),
            FakeSource::new(),
        );
        let package = catalogued(&h, temp.path(), "left-pad").await;

        let result = h
            .orchestrator
            .update_package(&package, Some("9.9.9"), &ProgressSink::silent())
            .await;

        assert!(!result.success);
        assert_eq!(result.verification, Verification::NotAttempted);
        assert!(result.error_message.unwrap().contains("npm ERR! 404"));
        let stored = h.catalog.get_package(&package.project_path, "left-pad").unwrap().unwrap();
        assert_eq!(stored.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_successful_update_is_verified_by_rescan() {
        let temp = TempDir::new().unwrap();
        write_package_json(temp.path(), r#""left-pad": "1.0.0""#);
        let runner = FakeRunner::new().on_run(|command, cwd| {
            if command.program == "npm" {
                write_package_json(cwd.unwrap(), r#""left-pad": "^1.3.0""#);
            }
        });
        let h = harness(runner, FakeSource::new());
        let package = catalogued(&h, temp.path(), "left-pad").await;

        let result = h
            .orchestrator
            .update_package(&package, Some("1.3.0"), &ProgressSink::silent())
            .await;

        assert!(result.success);
        assert_eq!(result.verification, Verification::Verified);
        assert_eq!(result.new_version.as_deref(), Some("1.3.0"));
        assert_eq!(h.runner.commands()[0].to_string(), "npm install left-pad@1.3.0");

        let stored = h.catalog.get_package(&package.project_path, "left-pad").unwrap().unwrap();
        assert_eq!(stored.version, "1.3.0");
        assert_eq!(stored.declared.as_deref(), Some("^1.3.0"));
    }

    #[tokio::test]
    async fn test_reconciliation_miss_is_degraded() {
        let temp = TempDir::new().unwrap();
        write_package_json(temp.path(), r#""left-pad": "1.0.0""#);
        // the tool "succeeds" but the manifest no longer mentions the package
        let runner = FakeRunner::new().on_run(|_, cwd| write_package_json(cwd.unwrap(), ""));
        let h = harness(runner, FakeSource::new());
        let package = catalogued(&h, temp.path(), "left-pad").await;

        let result = h
            .orchestrator
            .update_package(&package, Some("1.3.0"), &ProgressSink::silent())
            .await;

        assert!(result.success);
        assert_eq!(result.verification, Verification::Degraded);
        let stored = h.catalog.get_package(&package.project_path, "left-pad").unwrap().unwrap();
        assert_eq!(stored.version, "1.3.0");
        assert!(!stored.is_outdated);
    }

    #[tokio::test]
    async fn test_pip_update_pins_requirements() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), "requests==2.0.0\nflask==3.0.0\n").unwrap();
        let h = harness(FakeRunner::new(), FakeSource::new().with("requests", "2.31.0"));
        let package = catalogued(&h, temp.path(), "requests").await;

        let result = h.orchestrator.update_package(&package, None, &ProgressSink::silent()).await;

        assert!(result.success);
        assert_eq!(result.verification, Verification::Verified);
        assert_eq!(h.runner.commands()[0].to_string(), "python3 -m pip install requests==2.31.0");
        assert_eq!(
            fs::read_to_string(temp.path().join("requirements.txt")).unwrap(),
            "requests==2.31.0\nflask==3.0.0\n"
        );
    }

    fn virtualenv_project(requirements: &str, installed: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), requirements).unwrap();
        let venv = temp.path().join(".venv");
        fs::create_dir_all(venv.join("bin")).unwrap();
        fs::create_dir_all(venv.join("lib/python3.12/site-packages").join(installed)).unwrap();
        fs::write(venv.join("pyvenv.cfg"), "home = /usr/bin\n").unwrap();
        fs::write(venv.join("bin/python"), "").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_pip_update_runs_in_project_virtualenv() {
        let temp = virtualenv_project("requests==2.0.0\n", "requests-2.0.0.dist-info");
        let runner = FakeRunner::new().on_run(|command, cwd| {
            if command.args.iter().any(|a| a == "install") {
                let site = cwd.unwrap().join(".venv/lib/python3.12/site-packages");
                fs::rename(site.join("requests-2.0.0.dist-info"), site.join("requests-2.31.0.dist-info")).unwrap();
            }
        });
        let h = harness(runner, FakeSource::new().with("requests", "2.31.0"));
        let package = catalogued(&h, temp.path(), "requests").await;
        assert_eq!(package.version, "2.0.0");

        let result = h.orchestrator.update_package(&package, None, &ProgressSink::silent()).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.verification, Verification::Verified);
        assert_eq!(result.new_version.as_deref(), Some("2.31.0"));
        let command = &h.runner.commands()[0];
        assert!(command.program.ends_with(".venv/bin/python"), "{}", command);
        assert_eq!(command.args, vec!["-m", "pip", "install", "requests==2.31.0"]);
        assert_eq!(
            fs::read_to_string(temp.path().join("requirements.txt")).unwrap(),
            "requests==2.31.0\n"
        );
    }

    #[tokio::test]
    async fn test_update_that_changes_nothing_fails() {
        let temp = virtualenv_project("requests==2.0.0\n", "requests-2.0.0.dist-info");
        let h = harness(FakeRunner::new(), FakeSource::new().with("requests", "2.31.0"));
        let package = catalogued(&h, temp.path(), "requests").await;

        let result = h.orchestrator.update_package(&package, None, &ProgressSink::silent()).await;

        assert!(!result.success);
        assert_eq!(result.new_version, None);
        assert!(result.error_message.unwrap().contains("still at 2.0.0"));
        assert_eq!(
            fs::read_to_string(temp.path().join("requirements.txt")).unwrap(),
            "requests==2.0.0\n"
        );
        let stored = h.catalog.get_package(&package.project_path, "requests").unwrap().unwrap();
        assert_eq!(stored.version, "2.0.0");
        assert_eq!(stored.declared.as_deref(), Some("==2.0.0"));
    }

    #[tokio::test]
    async fn test_unknown_target_without_registry_entry_fails() {
        let h = harness(FakeRunner::new(), FakeSource::new());
        let package = Package::new("/code/app", "ghost", Ecosystem::JsNpm, "1.0.0");

        let result = h.orchestrator.update_package(&package, None, &ProgressSink::silent()).await;
        assert!(!result.success);
        assert!(h.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_global_update_uses_global_scope() {
        let runner = FakeRunner::new()
            .respond(CommandOutput::ok("added 1 package"))
            .respond(CommandOutput::ok(r#"{"dependencies": {"typescript": {"version": "5.4.0"}}}"#));
        let h = harness(runner, FakeSource::new());
        h.catalog.upsert_project(&Project::global(Ecosystem::JsNpm).unwrap()).unwrap();
        let package = Package::new("::global::npm", "typescript", Ecosystem::JsNpm, "5.3.3");
        h.catalog.upsert_package(&package).unwrap();

        let result = h
            .orchestrator
            .update_package(&package, Some("5.4.0"), &ProgressSink::silent())
            .await;

        assert_eq!(result.verification, Verification::Verified);
        let commands: Vec<String> = h.runner.commands().iter().map(|c| c.to_string()).collect();
        assert_eq!(commands, vec!["npm install -g typescript@5.4.0", "npm ls -g --depth=0 --json"]);
        let stored = h.catalog.get_package("::global::npm", "typescript").unwrap().unwrap();
        assert_eq!(stored.version, "5.4.0");
    }

    #[tokio::test]
    async fn test_batch_summary_counts() {
        let temp = TempDir::new().unwrap();
        write_package_json(temp.path(), r#""a": "1.0.0", "b": "1.0.0""#);
        let runner = FakeRunner::new()
            .respond(CommandOutput::failed(1, "npm ERR! boom"))
            .on_run(|command, cwd| {
                if command.args.iter().any(|a| a == "b@2.0.0") {
                    write_package_json(cwd.unwrap(), r#""a": "1.0.0", "b": "2.0.0""#);
                }
            });
        let h = harness(runner, FakeSource::new().with("a", "2.0.0").with("b", "2.0.0"));
        let a = catalogued(&h, temp.path(), "a").await;
        let b = h.catalog.get_package(&a.project_path, "b").unwrap().unwrap();

        let summary = h.orchestrator.update_packages(&[a, b], &ProgressSink::silent()).await;

        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.to_string().starts_with("1 succeeded, 1 failed"));
    }

    #[tokio::test]
    async fn test_uninstall() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("requirements.txt"), "requests==2.31.0\nflask==3.0.0\n").unwrap();
        let h = harness(
            FakeRunner::new()
                .respond(CommandOutput::ok("Successfully uninstalled requests"))
                .respond(CommandOutput::failed(1, "ERROR: flask is required by app")),
            FakeSource::new(),
        );
        let requests = catalogued(&h, temp.path(), "requests").await;
        let flask = h.catalog.get_package(&requests.project_path, "flask").unwrap().unwrap();

        assert!(h.orchestrator.uninstall_package(&requests, &ProgressSink::silent()).await);
        assert!(h.catalog.get_package(&requests.project_path, "requests").unwrap().is_none());
        assert_eq!(fs::read_to_string(temp.path().join("requirements.txt")).unwrap(), "flask==3.0.0\n");
        let project = h.catalog.get_project(&requests.project_path).unwrap().unwrap();
        assert_eq!(project.package_count, 1);

        assert!(!h.orchestrator.uninstall_package(&flask, &ProgressSink::silent()).await);
        assert!(h.catalog.get_package(&flask.project_path, "flask").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_vcpkg_update_restores_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest = r#"{"name": "app", "dependencies": ["fmt"]}"#;
        fs::write(temp.path().join("vcpkg.json"), manifest).unwrap();
        let h = harness(
            FakeRunner::new().respond(CommandOutput::failed(1, "error: no version database entry for fmt at 99.0.0")),
            FakeSource::new(),
        );
        let package = catalogued(&h, temp.path(), "fmt").await;

        let result = h
            .orchestrator
            .update_package(&package, Some("99.0.0"), &ProgressSink::silent())
            .await;

        assert!(!result.success);
        assert_eq!(fs::read_to_string(temp.path().join("vcpkg.json")).unwrap(), manifest);
    }
}
