use std::path::Path;

use crate::ecosystem::{is_requirements_file, PackageManager};
use crate::runner::{CommandLine, CommandOutput};

/// Where a command acts: inside a project directory or on the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Project,
    Global,
}

fn pip(python: &str) -> CommandLine {
    CommandLine::new(python).args(["-m", "pip"])
}

/// Install (or move) one package to `version`. For conan and vcpkg the
/// manifest is edited first and the tool is asked to re-resolve it.
pub fn install(
    manager: PackageManager,
    python: &str,
    name: &str,
    version: &str,
    is_dev: bool,
    scope: Scope,
) -> Vec<CommandLine> {
    let global = scope == Scope::Global;
    let at = format!("{}@{}", name, version);
    let pinned = format!("{}=={}", name, version);

    let command = match manager {
        PackageManager::Bun => CommandLine::new("bun")
            .arg("add")
            .arg_if(global, "-g")
            .arg_if(is_dev && !global, "--dev")
            .arg(at),
        PackageManager::Pnpm => CommandLine::new("pnpm")
            .arg("add")
            .arg_if(global, "-g")
            .arg_if(is_dev && !global, "--save-dev")
            .arg(at),
        PackageManager::Yarn if global => CommandLine::new("yarn").args(["global", "add"]).arg(at),
        PackageManager::Yarn => CommandLine::new("yarn").arg("add").arg_if(is_dev, "--dev").arg(at),
        PackageManager::Npm => CommandLine::new("npm")
            .arg("install")
            .arg_if(global, "-g")
            .arg_if(is_dev && !global, "--save-dev")
            .arg(at),
        PackageManager::Poetry => CommandLine::new("poetry")
            .arg("add")
            .args(if is_dev { vec!["--group", "dev"] } else { vec![] })
            .arg(at),
        PackageManager::Pipenv => CommandLine::new("pipenv").arg("install").arg_if(is_dev, "--dev").arg(pinned),
        PackageManager::Pip => pip(python).arg("install").arg(pinned),
        PackageManager::Conan => CommandLine::new("conan").args(["install", ".", "--build=missing"]),
        PackageManager::Vcpkg => CommandLine::new("vcpkg").arg("install"),
    };
    vec![command]
}

pub fn uninstall(manager: PackageManager, python: &str, name: &str, is_dev: bool, scope: Scope) -> Vec<CommandLine> {
    let global = scope == Scope::Global;

    let command = match manager {
        PackageManager::Bun => CommandLine::new("bun").arg("remove").arg_if(global, "-g").arg(name),
        PackageManager::Pnpm => CommandLine::new("pnpm").arg("remove").arg_if(global, "-g").arg(name),
        PackageManager::Yarn if global => CommandLine::new("yarn").args(["global", "remove", name]),
        PackageManager::Yarn => CommandLine::new("yarn").args(["remove", name]),
        PackageManager::Npm => CommandLine::new("npm").arg("uninstall").arg_if(global, "-g").arg(name),
        PackageManager::Poetry => CommandLine::new("poetry")
            .arg("remove")
            .args(if is_dev { vec!["--group", "dev"] } else { vec![] })
            .arg(name),
        PackageManager::Pipenv => CommandLine::new("pipenv").args(["uninstall", name]),
        PackageManager::Pip => pip(python).args(["uninstall", "-y", name]),
        PackageManager::Conan => CommandLine::new("conan").args(["install", ".", "--build=missing"]),
        PackageManager::Vcpkg => CommandLine::new("vcpkg").arg("install"),
    };
    vec![command]
}

/// Requirement files in `dir`, production file first.
pub fn requirement_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| is_requirements_file(name))
                .collect()
        })
        .unwrap_or_default();
    files.sort_by_key(|name| (name.to_ascii_lowercase() != "requirements.txt", name.clone()));
    files
}

/// The "update everything the manifest allows" commands for a whole project.
pub fn bulk_update(manager: PackageManager, python: &str, dir: &Path) -> Result<Vec<CommandLine>, String> {
    let commands = match manager {
        PackageManager::Bun => vec![CommandLine::new("bun").arg("update")],
        PackageManager::Pnpm => vec![CommandLine::new("pnpm").arg("update")],
        PackageManager::Yarn => vec![CommandLine::new("yarn").arg("upgrade")],
        PackageManager::Npm => vec![CommandLine::new("npm").arg("update")],
        PackageManager::Poetry => vec![CommandLine::new("poetry").arg("update")],
        PackageManager::Pipenv => vec![CommandLine::new("pipenv").arg("update")],
        PackageManager::Pip => {
            let files = requirement_files(dir);
            if files.is_empty() {
                return Err(format!("no requirements file in {} to upgrade from", dir.display()));
            }
            let mut command = pip(python).args(["install", "--upgrade"]);
            for file in files {
                command = command.arg("-r").arg(file);
            }
            vec![command]
        }
        PackageManager::Conan => vec![CommandLine::new("conan").args(["install", ".", "--update", "--build=missing"])],
        PackageManager::Vcpkg => vec![
            CommandLine::new("vcpkg").arg("x-update-baseline"),
            CommandLine::new("vcpkg").arg("install"),
        ],
    };
    Ok(commands)
}

/// Bulk update of a global scope. pip has no such verb.
pub fn global_bulk_update(manager: PackageManager) -> Option<CommandLine> {
    match manager {
        PackageManager::Npm => Some(CommandLine::new("npm").args(["update", "-g"])),
        PackageManager::Bun => Some(CommandLine::new("bun").args(["update", "-g"])),
        PackageManager::Pnpm => Some(CommandLine::new("pnpm").args(["update", "-g"])),
        _ => None,
    }
}

fn is_error_line(manager: PackageManager, line: &str) -> bool {
    let line = line.trim_start();
    match manager {
        PackageManager::Npm => line.starts_with("npm ERR!") || line.starts_with("npm error"),
        PackageManager::Pnpm => line.contains("ERR_PNPM"),
        PackageManager::Bun | PackageManager::Vcpkg => line.starts_with("error:"),
        PackageManager::Yarn => line.starts_with("error:") || line.starts_with("error "),
        // pip reports resolver conflicts this way on otherwise successful installs
        PackageManager::Pip | PackageManager::Pipenv | PackageManager::Conan => {
            line.starts_with("ERROR:") && !line.starts_with("ERROR: pip's dependency resolver")
        }
        PackageManager::Poetry => false,
    }
}

/// Why a finished command counts as failed, or None if it succeeded.
/// Error markers in the output override a zero exit status.
pub fn failure_message(manager: PackageManager, output: &CommandOutput) -> Option<String> {
    let marker = output
        .stderr
        .lines()
        .chain(output.stdout.lines())
        .find(|line| is_error_line(manager, line));
    if let Some(line) = marker {
        return Some(line.trim().to_string());
    }
    if output.success {
        return None;
    }

    let last_line = |text: &str| text.lines().rev().map(str::trim).find(|l| !l.is_empty()).map(str::to_string);
    Some(
        last_line(&output.stderr)
            .or_else(|| last_line(&output.stdout))
            .unwrap_or_else(|| match output.code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn rendered(commands: Vec<CommandLine>) -> Vec<String> {
        commands.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_install_verbs() {
        let cases = [
            (PackageManager::Bun, false, Scope::Project, "bun add hono@4.0.1"),
            (PackageManager::Bun, true, Scope::Project, "bun add --dev hono@4.0.1"),
            (PackageManager::Pnpm, true, Scope::Project, "pnpm add --save-dev hono@4.0.1"),
            (PackageManager::Yarn, true, Scope::Project, "yarn add --dev hono@4.0.1"),
            (PackageManager::Npm, false, Scope::Global, "npm install -g hono@4.0.1"),
            (PackageManager::Npm, true, Scope::Global, "npm install -g hono@4.0.1"),
            (PackageManager::Poetry, true, Scope::Project, "poetry add --group dev hono@4.0.1"),
            (PackageManager::Pipenv, false, Scope::Project, "pipenv install hono==4.0.1"),
            (PackageManager::Pip, false, Scope::Project, "python3 -m pip install hono==4.0.1"),
            (PackageManager::Vcpkg, false, Scope::Project, "vcpkg install"),
        ];
        for (manager, is_dev, scope, expected) in cases {
            assert_eq!(
                rendered(install(manager, "python3", "hono", "4.0.1", is_dev, scope)),
                vec![expected.to_string()],
                "{:?}",
                manager
            );
        }
    }

    #[test]
    fn test_uninstall_verbs() {
        assert_eq!(
            rendered(uninstall(PackageManager::Pip, "python3", "black", false, Scope::Global)),
            vec!["python3 -m pip uninstall -y black"]
        );
        assert_eq!(
            rendered(uninstall(PackageManager::Bun, "python3", "typescript", false, Scope::Global)),
            vec!["bun remove -g typescript"]
        );
        assert_eq!(
            rendered(uninstall(PackageManager::Yarn, "python3", "left-pad", false, Scope::Project)),
            vec!["yarn remove left-pad"]
        );
    }

    #[test]
    fn test_pip_bulk_update_uses_every_requirements_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("requirements-dev.txt"), "pytest\n").unwrap();
        std::fs::write(temp.path().join("requirements.txt"), "flask\n").unwrap();

        let commands = bulk_update(PackageManager::Pip, "python3", temp.path()).unwrap();
        assert_eq!(
            rendered(commands),
            vec!["python3 -m pip install --upgrade -r requirements.txt -r requirements-dev.txt"]
        );
    }

    #[test]
    fn test_pip_bulk_update_needs_a_requirements_file() {
        let temp = TempDir::new().unwrap();
        assert!(bulk_update(PackageManager::Pip, "python3", temp.path()).is_err());
    }

    #[test]
    fn test_vcpkg_bulk_update_moves_baseline_first() {
        let temp = TempDir::new().unwrap();
        let commands = bulk_update(PackageManager::Vcpkg, "python3", temp.path()).unwrap();
        assert_eq!(rendered(commands), vec!["vcpkg x-update-baseline", "vcpkg install"]);
    }

    #[test]
    fn test_error_marker_beats_zero_exit() {
        let output = CommandOutput {
            success: true,
            code: Some(0),
            stdout: String::new(),
            stderr: "npm ERR! code ETARGET\nnpm ERR! notarget No matching version found".to_string(),
        };
        assert_eq!(
            failure_message(PackageManager::Npm, &output).as_deref(),
            Some("npm ERR! code ETARGET")
        );
        assert_eq!(failure_message(PackageManager::Npm, &CommandOutput::ok("added 1 package")), None);
    }

    #[test]
    fn test_pip_resolver_notice_is_not_a_failure() {
        let output = CommandOutput {
            stderr: "ERROR: pip's dependency resolver does not currently take into account all the packages".to_string(),
            ..CommandOutput::ok("Successfully installed requests-2.31.0")
        };
        assert_eq!(failure_message(PackageManager::Pip, &output), None);

        let output = CommandOutput::ok("ERROR: No matching distribution found for requests==99");
        assert!(failure_message(PackageManager::Pip, &output).is_some());
    }

    #[test]
    fn test_nonzero_exit_uses_last_stderr_line() {
        let output = CommandOutput::failed(1, "Resolving...\nSolverProblemError: version solving failed\n\n");
        assert_eq!(
            failure_message(PackageManager::Poetry, &output).as_deref(),
            Some("SolverProblemError: version solving failed")
        );
        assert_eq!(
            failure_message(PackageManager::Poetry, &CommandOutput::failed(3, "")).as_deref(),
            Some("exited with status 3")
        );
    }
}
