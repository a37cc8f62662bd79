use std::sync::Arc;
use tracing::debug;

use crate::error::{DepcatError, Result};
use crate::runner::{CommandLine, CommandRunner};
use crate::types::Ecosystem;

/// Lists what is installed in an ecosystem's global scope by asking its tool.
#[derive(Clone)]
pub struct GlobalScanner {
    runner: Arc<dyn CommandRunner>,
    python: String,
}

impl GlobalScanner {
    pub fn new(runner: Arc<dyn CommandRunner>, python: impl Into<String>) -> Self {
        Self {
            runner,
            python: python.into(),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn command(&self, ecosystem: Ecosystem) -> Option<CommandLine> {
        match ecosystem {
            Ecosystem::JsNpm => Some(CommandLine::new("npm").args(["ls", "-g", "--depth=0", "--json"])),
            Ecosystem::JsBun => Some(CommandLine::new("bun").args(["pm", "ls", "-g"])),
            Ecosystem::Python => Some(CommandLine::new(&self.python).args(["-m", "pip", "list", "--format=json"])),
            Ecosystem::Cpp => None,
        }
    }

    /// `(name, version)` pairs. C++ has no global scope and yields nothing.
    pub async fn list(&self, ecosystem: Ecosystem) -> Result<Vec<(String, String)>> {
        let Some(command) = self.command(ecosystem) else {
            return Ok(Vec::new());
        };

        let output = self.runner.run(&command, None).await.map_err(|e| DepcatError::ExternalTool {
            command: command.to_string(),
            message: e.to_string(),
        })?;
        // npm ls exits non-zero on peer dependency problems but still prints the tree
        if !output.success && output.stdout.trim().is_empty() {
            return Err(DepcatError::ExternalTool {
                command: command.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        debug!(command = %command, bytes = output.stdout.len(), "listed global packages");

        match ecosystem {
            Ecosystem::JsNpm => parse_npm_ls(&output.stdout),
            Ecosystem::JsBun => Ok(parse_bun_ls(&output.stdout)),
            Ecosystem::Python => parse_pip_list(&output.stdout),
            Ecosystem::Cpp => Ok(Vec::new()),
        }
    }
}

pub fn parse_npm_ls(stdout: &str) -> Result<Vec<(String, String)>> {
    let json: serde_json::Value = serde_json::from_str(stdout)?;
    let mut packages: Vec<(String, String)> = json
        .get("dependencies")
        .and_then(|v| v.as_object())
        .map(|deps| {
            deps.iter()
                .filter_map(|(name, info)| {
                    let version = info.get("version")?.as_str()?;
                    Some((name.clone(), version.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    packages.sort();
    Ok(packages)
}

/// `bun pm ls -g` prints a tree:
///
/// ```text
/// /home/me/.bun/install/global node_modules (3)
/// ├── @anthropic-ai/sdk@0.20.0
/// └── typescript@5.3.3
/// ```
pub fn parse_bun_ls(stdout: &str) -> Vec<(String, String)> {
    let mut packages = Vec::new();
    for line in stdout.lines() {
        let entry = line.trim_start_matches(|c: char| !c.is_alphanumeric() && c != '@').trim();
        if entry.is_empty() || entry.contains(' ') {
            continue;
        }
        // an '@' at index 0 is the scope marker, not the version separator
        let Some(at) = entry.rfind('@').filter(|&i| i > 0) else {
            continue;
        };
        let (name, version) = (&entry[..at], &entry[at + 1..]);
        if !name.is_empty() && !version.is_empty() {
            packages.push((name.to_string(), version.to_string()));
        }
    }
    packages
}

pub fn parse_pip_list(stdout: &str) -> Result<Vec<(String, String)>> {
    #[derive(serde::Deserialize)]
    struct Entry {
        name: String,
        version: String,
    }

    let entries: Vec<Entry> = serde_json::from_str(stdout.trim())?;
    Ok(entries.into_iter().map(|e| (e.name, e.version)).collect())
}
