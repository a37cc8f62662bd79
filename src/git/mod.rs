//! Upstream tracking for projects that are git working copies.
//!
//! Checks only talk to the remote through `git ls-remote`; nothing is fetched
//! and the working copy is never touched. Pulls are fast-forward only, so a
//! diverged branch fails cleanly instead of leaving a half-merged tree.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogStore;
use crate::error::{DepcatError, Result};
use crate::progress::ProgressSink;
use crate::runner::{CommandLine, CommandOutput, CommandRunner};
use crate::scanner::ScannerEngine;

const DEFAULT_UPSTREAM: &str = "origin/HEAD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub update_available: bool,
    pub local_revision: String,
    pub remote_revision: Option<String>,
}

#[derive(Clone)]
pub struct SourceUpdateChecker {
    catalog: CatalogStore,
    scanner: ScannerEngine,
    runner: Arc<dyn CommandRunner>,
}

impl SourceUpdateChecker {
    pub fn new(catalog: CatalogStore, scanner: ScannerEngine, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            catalog,
            scanner,
            runner,
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        let command = CommandLine::new("git").args(args.iter().copied());
        self.runner
            .run(&command, Some(dir))
            .await
            .map_err(|e| DepcatError::ExternalTool {
                command: command.to_string(),
                message: e.to_string(),
            })
    }

    /// First line of stdout from a successful git call.
    async fn git_line(&self, dir: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = self.git(dir, args).await?;
        if !output.success {
            return Ok(None);
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    /// Compare HEAD with the tip of its upstream branch on the remote.
    pub async fn check_for_updates(&self, path: &str) -> Result<SourceStatus> {
        let dir = Path::new(path);
        let local = self
            .git_line(dir, &["rev-parse", "HEAD"])
            .await?
            .ok_or_else(|| DepcatError::ExternalTool {
                command: "git rev-parse HEAD".to_string(),
                message: format!("{} is not a git working copy with commits", path),
            })?;

        let upstream = self
            .git_line(dir, &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .await?
            .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());
        let (remote, branch) = upstream.split_once('/').unwrap_or(("origin", upstream.as_str()));
        let reference = if branch == "HEAD" {
            "HEAD".to_string()
        } else {
            format!("refs/heads/{}", branch)
        };

        let listing = self.git(dir, &["ls-remote", remote, &reference]).await?;
        if !listing.success {
            warn!(path, remote, stderr = %listing.stderr.trim(), "could not reach remote");
        }
        let remote_revision = listing
            .stdout
            .lines()
            .find_map(|line| line.split_whitespace().next())
            .map(str::to_string);

        let update_available = match &remote_revision {
            Some(remote_rev) if *remote_rev != local => {
                // a remote tip already contained in HEAD means we are ahead, not behind
                let ancestor = self.git(dir, &["merge-base", "--is-ancestor", remote_rev, &local]).await?;
                !ancestor.success
            }
            _ => false,
        };

        debug!(path, local = %local, remote = ?remote_revision, update_available, "checked upstream");
        Ok(SourceStatus {
            update_available,
            local_revision: local,
            remote_revision,
        })
    }

    /// Check and store the outcome on the catalog project.
    pub async fn record(&self, path: &str) -> Result<SourceStatus> {
        let status = self.check_for_updates(path).await?;
        self.catalog.update_project_source_status(
            path,
            Some(&status.local_revision),
            status.remote_revision.as_deref(),
            status.update_available,
        )?;
        Ok(status)
    }

    /// Fast-forward the working copy. False on any failure.
    pub async fn pull(&self, path: &str, progress: &ProgressSink) -> bool {
        progress.message(format!("Pulling {}", path));
        match self.git(Path::new(path), &["pull", "--ff-only"]).await {
            Ok(output) if output.success => {
                info!(path, "pulled upstream changes");
                true
            }
            Ok(output) => {
                error!(path, stderr = %output.stderr.trim(), "git pull failed");
                false
            }
            Err(e) => {
                error!(path, error = %e, "git pull failed");
                false
            }
        }
    }

    /// Pull, then rescan the project since its manifests may have changed.
    pub async fn pull_and_rescan(&self, path: &str, progress: &ProgressSink) -> bool {
        if !self.pull(path, progress).await {
            return false;
        }

        match self.scanner.scan_single_project(path, None, progress.clone()).await {
            Ok(result) => {
                if let Err(e) = self.catalog.apply_scan(&result) {
                    warn!(path, error = %e, "rescan after pull could not be stored");
                }
            }
            Err(e) => warn!(path, error = %e, "rescan after pull failed"),
        }
        if let Err(e) = self.record(path).await {
            warn!(path, error = %e, "could not refresh revisions after pull");
        }
        true
    }
}
