use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A program invocation, kept as data so it can be logged and asserted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_if(self, condition: bool, arg: impl Into<String>) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. An `Err` means the program could not be started.
    async fn run(&self, command: &CommandLine, cwd: Option<&Path>) -> std::io::Result<CommandOutput>;
}

/// Runs real processes. Children are killed if the awaiting future is dropped.
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn resolve_program(program: &str) -> String {
        if cfg!(windows) && matches!(program, "npm" | "npx" | "yarn" | "pnpm") {
            format!("{}.cmd", program)
        } else {
            program.to_string()
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine, cwd: Option<&Path>) -> std::io::Result<CommandOutput> {
        debug!(command = %command, cwd = ?cwd, "running external tool");

        let mut cmd = Command::new(Self::resolve_program(&command.program));
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every invocation and replays canned outputs in order.
    /// With no canned output left it answers with a bare success.
    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: Mutex<Vec<(CommandLine, Option<PathBuf>)>>,
        responses: Mutex<VecDeque<CommandOutput>>,
        hooks: Mutex<Vec<Box<dyn Fn(&CommandLine, Option<&Path>) + Send + Sync>>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, output: CommandOutput) -> Self {
            self.responses.lock().unwrap().push_back(output);
            self
        }

        /// Side effect run on each call, e.g. to mimic a tool writing files.
        pub fn on_run(self, hook: impl Fn(&CommandLine, Option<&Path>) + Send + Sync + 'static) -> Self {
            self.hooks.lock().unwrap().push(Box::new(hook));
            self
        }

        pub fn commands(&self) -> Vec<CommandLine> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &CommandLine, cwd: Option<&Path>) -> std::io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((command.clone(), cwd.map(Path::to_path_buf)));
            for hook in self.hooks.lock().unwrap().iter() {
                hook(command, cwd);
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::ok("")))
        }
    }
}
