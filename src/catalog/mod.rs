//! Durable catalog of projects and packages.
//!
//! One SQLite database holds two tables, `projects` keyed by `path` and
//! `packages` keyed by `(project_path, name)`. Every mutation is a single
//! statement or a single transaction, so a failure leaves previously committed
//! records intact. The connection sits behind a mutex: writers to the same key
//! are serialized and readers see the last committed state.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub mod export;

use crate::ecosystem::strategy;
use crate::error::{DepcatError, Result};
use crate::types::{Ecosystem, Package, PackageMetadata, Project, ScanResult};

const SCHEMA_VERSION: i32 = 1;

#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

/// What [`CatalogStore::apply_scan`] committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub projects: usize,
    pub packages: usize,
    pub pruned: usize,
    pub errors: Vec<String>,
}

impl CatalogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DepcatError::Poisoned)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        let current: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS projects (
                    path TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    ecosystem TEXT NOT NULL,
                    is_group INTEGER NOT NULL DEFAULT 0,
                    parent_path TEXT,
                    package_count INTEGER NOT NULL DEFAULT 0,
                    last_scanned TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    is_git_repo INTEGER NOT NULL DEFAULT 0,
                    local_revision TEXT,
                    remote_revision TEXT,
                    update_available INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_projects_parent ON projects(parent_path);

                CREATE TABLE IF NOT EXISTS packages (
                    project_path TEXT NOT NULL,
                    name TEXT NOT NULL,
                    ecosystem TEXT NOT NULL,
                    version TEXT NOT NULL,
                    declared TEXT,
                    latest_version TEXT,
                    is_outdated INTEGER NOT NULL DEFAULT 0,
                    not_found INTEGER NOT NULL DEFAULT 0,
                    is_dev INTEGER NOT NULL DEFAULT 0,
                    description TEXT,
                    author TEXT,
                    license TEXT,
                    homepage TEXT,
                    repository TEXT,
                    last_checked TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (project_path, name)
                );
                CREATE INDEX IF NOT EXISTS idx_packages_project ON packages(project_path);
                "#,
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    pub fn get_all_projects(&self) -> Result<Vec<Project>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM projects")?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    pub fn get_all_packages(&self) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM packages")?;
        let packages = stmt
            .query_map([], package_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    pub fn get_project(&self, path: &str) -> Result<Option<Project>> {
        let conn = self.lock()?;
        read_project(&conn, path)
    }

    pub fn get_package(&self, project_path: &str, name: &str) -> Result<Option<Package>> {
        let conn = self.lock()?;
        read_package(&conn, project_path, name)
    }

    pub fn get_packages_for_project(&self, project_path: &str) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        read_packages_for_project(&conn, project_path)
    }

    /// Insert or replace by `path`. `created_at` of an existing record survives.
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        let conn = self.lock()?;
        write_project(&conn, project)
    }

    /// Insert or replace by `(project_path, name)`. `created_at` of an
    /// existing record survives. `is_outdated` is derived from the versions:
    /// the caller's flag is ignored.
    pub fn upsert_package(&self, package: &Package) -> Result<()> {
        let conn = self.lock()?;
        write_package(&conn, package)
    }

    pub fn delete_package(&self, project_path: &str, name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM packages WHERE project_path = ?1 AND name = ?2",
            params![project_path, name],
        )?;
        Ok(())
    }

    /// Delete a project, every project nested under it, and all their packages.
    pub fn delete_project(&self, path: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let subtree = r#"
            WITH RECURSIVE subtree(path) AS (
                SELECT ?1
                UNION
                SELECT p.path FROM projects p JOIN subtree s ON p.parent_path = s.path
            )
        "#;
        let packages = tx.execute(
            &format!("{subtree} DELETE FROM packages WHERE project_path IN (SELECT path FROM subtree)"),
            [path],
        )?;
        let projects = tx.execute(
            &format!("{subtree} DELETE FROM projects WHERE path IN (SELECT path FROM subtree)"),
            [path],
        )?;
        tx.commit()?;

        debug!(path, projects, packages, "deleted project subtree");
        Ok(())
    }

    pub fn mark_package_as_updated(&self, project_path: &str, name: &str, new_version: &str) -> Result<()> {
        let conn = self.lock()?;
        let Some(package) = read_package(&conn, project_path, name)? else {
            return Ok(());
        };
        let is_outdated = derived_outdated(
            package.ecosystem,
            new_version,
            package.latest_version.as_deref(),
            package.not_found,
        );
        conn.execute(
            "UPDATE packages SET version = ?3, is_outdated = ?4, updated_at = ?5
             WHERE project_path = ?1 AND name = ?2",
            params![project_path, name, new_version, is_outdated, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a remote version check without touching the installed version.
    /// `is_outdated` follows from the stored version and `latest_version`.
    pub fn update_package_version_info(
        &self,
        project_path: &str,
        name: &str,
        latest_version: Option<&str>,
        not_found: bool,
    ) -> Result<()> {
        let conn = self.lock()?;
        let Some(package) = read_package(&conn, project_path, name)? else {
            return Ok(());
        };
        let is_outdated = derived_outdated(package.ecosystem, &package.version, latest_version, not_found);
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE packages SET latest_version = ?3, is_outdated = ?4, not_found = ?5,
                 last_checked = ?6, updated_at = ?6
             WHERE project_path = ?1 AND name = ?2",
            params![project_path, name, latest_version, is_outdated, not_found, now],
        )?;
        Ok(())
    }

    /// Fill in registry metadata; fields the registry did not supply keep their value.
    pub fn update_package_metadata(&self, project_path: &str, name: &str, metadata: &PackageMetadata) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE packages SET
                 description = COALESCE(?3, description),
                 author = COALESCE(?4, author),
                 license = COALESCE(?5, license),
                 homepage = COALESCE(?6, homepage),
                 repository = COALESCE(?7, repository)
             WHERE project_path = ?1 AND name = ?2",
            params![
                project_path,
                name,
                metadata.description,
                metadata.author,
                metadata.license,
                metadata.homepage,
                metadata.repository,
            ],
        )?;
        Ok(())
    }

    pub fn update_project_source_status(
        &self,
        path: &str,
        local_revision: Option<&str>,
        remote_revision: Option<&str>,
        update_available: bool,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE projects SET is_git_repo = 1, local_revision = ?2, remote_revision = ?3,
                 update_available = ?4, updated_at = ?5
             WHERE path = ?1",
            params![path, local_revision, remote_revision, update_available, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Recompute a project's `package_count` from the packages table.
    pub fn refresh_package_count(&self, path: &str) -> Result<()> {
        let conn = self.lock()?;
        recount_packages(&conn, path)
    }

    /// Irreversibly wipe both tables.
    pub fn clear_all_data(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM packages", [])?;
        tx.execute("DELETE FROM projects", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert the facts of a scan in one transaction.
    ///
    /// Knowledge the scan cannot observe is carried over from existing records:
    /// a project keeps its group membership and revisions, a package keeps its
    /// registry check results with `is_outdated` recomputed against the freshly
    /// observed version. Packages of the scanned ecosystems that have
    /// disappeared from a scanned project are removed. A record that violates
    /// an invariant is skipped and reported. Nothing is visible to other
    /// readers until the whole scan commits.
    pub fn apply_scan(&self, result: &ScanResult) -> Result<ApplyReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut report = ApplyReport::default();

        for scanned in &result.projects {
            let mut project = scanned.clone();
            if let Some(existing) = read_project(&tx, &project.path)? {
                if project.parent_path.is_none() && !project.is_group {
                    project.parent_path = existing.parent_path.filter(|_| !project.is_global());
                }
                if project.local_revision.is_none() {
                    project.local_revision = existing.local_revision;
                    project.remote_revision = existing.remote_revision;
                    project.update_available = existing.update_available;
                }
            }
            match write_project(&tx, &project) {
                Ok(()) => report.projects += 1,
                Err(e) => {
                    warn!(path = %project.path, error = %e, "skipping project record");
                    report.errors.push(format!("{}: {}", project.path, e));
                }
            }
        }

        for scanned in &result.packages {
            let mut package = scanned.clone();
            if let Some(existing) = read_package(&tx, &package.project_path, &package.name)? {
                package.latest_version = existing.latest_version;
                package.not_found = existing.not_found;
                package.last_checked = existing.last_checked;
                if package.metadata == PackageMetadata::default() {
                    package.metadata = existing.metadata;
                }
            }
            match write_package(&tx, &package) {
                Ok(()) => report.packages += 1,
                Err(e) => {
                    warn!(package = %package.name, error = %e, "skipping package record");
                    report.errors.push(format!("{} ({}): {}", package.name, package.project_path, e));
                }
            }
        }

        for project in result.projects.iter().filter(|p| !p.is_group) {
            let seen: HashSet<&str> = result
                .packages
                .iter()
                .filter(|p| p.project_path == project.path)
                .map(|p| p.name.as_str())
                .collect();
            for stale in read_packages_for_project(&tx, &project.path)? {
                if result.ecosystems.contains(&stale.ecosystem) && !seen.contains(stale.name.as_str()) {
                    tx.execute(
                        "DELETE FROM packages WHERE project_path = ?1 AND name = ?2",
                        params![stale.project_path, stale.name],
                    )?;
                    report.pruned += 1;
                }
            }
            recount_packages(&tx, &project.path)?;
        }

        tx.commit()?;
        Ok(report)
    }
}

/// Outdated only when the registry knows the package and its latest version
/// orders strictly after the installed one.
fn derived_outdated(ecosystem: Ecosystem, version: &str, latest_version: Option<&str>, not_found: bool) -> bool {
    !not_found && latest_version.map_or(false, |latest| strategy(ecosystem).is_newer(latest, version))
}

fn read_project(conn: &Connection, path: &str) -> Result<Option<Project>> {
    let project = conn
        .query_row("SELECT * FROM projects WHERE path = ?1", [path], project_from_row)
        .optional()?;
    Ok(project)
}

fn read_package(conn: &Connection, project_path: &str, name: &str) -> Result<Option<Package>> {
    let package = conn
        .query_row(
            "SELECT * FROM packages WHERE project_path = ?1 AND name = ?2",
            params![project_path, name],
            package_from_row,
        )
        .optional()?;
    Ok(package)
}

fn read_packages_for_project(conn: &Connection, project_path: &str) -> Result<Vec<Package>> {
    let mut stmt = conn.prepare("SELECT * FROM packages WHERE project_path = ?1")?;
    let packages = stmt
        .query_map([project_path], package_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(packages)
}

fn recount_packages(conn: &Connection, path: &str) -> Result<()> {
    conn.execute(
        "UPDATE projects SET package_count =
             (SELECT COUNT(*) FROM packages WHERE project_path = ?1)
         WHERE path = ?1 AND is_group = 0",
        [path],
    )?;
    Ok(())
}

fn write_project(conn: &Connection, project: &Project) -> Result<()> {
    validate_project(conn, project)?;

    conn.execute(
        r#"
        INSERT INTO projects (
            path, name, ecosystem, is_group, parent_path, package_count, last_scanned,
            created_at, updated_at, is_git_repo, local_revision, remote_revision, update_available
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(path) DO UPDATE SET
            name = excluded.name,
            ecosystem = excluded.ecosystem,
            is_group = excluded.is_group,
            parent_path = excluded.parent_path,
            package_count = excluded.package_count,
            last_scanned = excluded.last_scanned,
            updated_at = excluded.updated_at,
            is_git_repo = excluded.is_git_repo,
            local_revision = excluded.local_revision,
            remote_revision = excluded.remote_revision,
            update_available = excluded.update_available
        "#,
        params![
            project.path,
            project.name,
            project.ecosystem.as_str(),
            project.is_group,
            project.parent_path,
            project.package_count as i64,
            project.last_scanned.map(|t| t.to_rfc3339()),
            project.created_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            project.is_git_repo,
            project.local_revision,
            project.remote_revision,
            project.update_available,
        ],
    )?;
    Ok(())
}

fn write_package(conn: &Connection, package: &Package) -> Result<()> {
    let is_outdated = derived_outdated(
        package.ecosystem,
        &package.version,
        package.latest_version.as_deref(),
        package.not_found,
    );
    conn.execute(
        r#"
        INSERT INTO packages (
            project_path, name, ecosystem, version, declared, latest_version, is_outdated,
            not_found, is_dev, description, author, license, homepage, repository,
            last_checked, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        ON CONFLICT(project_path, name) DO UPDATE SET
            ecosystem = excluded.ecosystem,
            version = excluded.version,
            declared = excluded.declared,
            latest_version = excluded.latest_version,
            is_outdated = excluded.is_outdated,
            not_found = excluded.not_found,
            is_dev = excluded.is_dev,
            description = excluded.description,
            author = excluded.author,
            license = excluded.license,
            homepage = excluded.homepage,
            repository = excluded.repository,
            last_checked = excluded.last_checked,
            updated_at = excluded.updated_at
        "#,
        params![
            package.project_path,
            package.name,
            package.ecosystem.as_str(),
            package.version,
            package.declared,
            package.latest_version,
            is_outdated,
            package.not_found,
            package.is_dev,
            package.metadata.description,
            package.metadata.author,
            package.metadata.license,
            package.metadata.homepage,
            package.metadata.repository,
            package.last_checked.map(|t| t.to_rfc3339()),
            package.created_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn validate_project(conn: &Connection, project: &Project) -> Result<()> {
    if project.is_global() {
        if project.is_group || project.parent_path.is_some() {
            return Err(DepcatError::InvalidProject(format!(
                "{} is a global scope and cannot be a group or have a parent",
                project.path
            )));
        }
        return Ok(());
    }

    if let Some(parent) = &project.parent_path {
        if project.is_group {
            return Err(DepcatError::InvalidProject(format!("group {} cannot have a parent", project.path)));
        }
        if parent == &project.path {
            return Err(DepcatError::InvalidProject(format!("{} cannot be its own parent", project.path)));
        }
        let parent_is_group: Option<bool> = conn
            .query_row("SELECT is_group FROM projects WHERE path = ?1", [parent], |row| row.get(0))
            .optional()?;
        if parent_is_group != Some(true) {
            return Err(DepcatError::InvalidProject(format!(
                "parent {} of {} is not a known group",
                parent, project.path
            )));
        }
    }
    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn get_ecosystem(row: &Row<'_>, column: &str) -> rusqlite::Result<Ecosystem> {
    let raw: String = row.get(column)?;
    raw.parse::<Ecosystem>()
        .map_err(|e| conversion_error(row.as_ref().column_index(column).unwrap_or(0), e))
}

fn get_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(row.as_ref().column_index(column).unwrap_or(0), e.to_string()))
    })
    .transpose()
}

fn get_required_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    get_timestamp(row, column)?
        .ok_or_else(|| conversion_error(0, format!("{} is missing", column)))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        path: row.get("path")?,
        name: row.get("name")?,
        ecosystem: get_ecosystem(row, "ecosystem")?,
        is_group: row.get("is_group")?,
        parent_path: row.get("parent_path")?,
        package_count: row.get::<_, i64>("package_count")?.max(0) as usize,
        last_scanned: get_timestamp(row, "last_scanned")?,
        created_at: get_required_timestamp(row, "created_at")?,
        updated_at: get_required_timestamp(row, "updated_at")?,
        is_git_repo: row.get("is_git_repo")?,
        local_revision: row.get("local_revision")?,
        remote_revision: row.get("remote_revision")?,
        update_available: row.get("update_available")?,
    })
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        project_path: row.get("project_path")?,
        name: row.get("name")?,
        ecosystem: get_ecosystem(row, "ecosystem")?,
        version: row.get("version")?,
        declared: row.get("declared")?,
        latest_version: row.get("latest_version")?,
        is_outdated: row.get("is_outdated")?,
        not_found: row.get("not_found")?,
        is_dev: row.get("is_dev")?,
        metadata: PackageMetadata {
            description: row.get("description")?,
            author: row.get("author")?,
            license: row.get("license")?,
            homepage: row.get("homepage")?,
            repository: row.get("repository")?,
        },
        last_checked: get_timestamp(row, "last_checked")?,
        created_at: get_required_timestamp(row, "created_at")?,
        updated_at: get_required_timestamp(row, "updated_at")?,
    })
}
