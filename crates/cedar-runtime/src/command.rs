use crate::RuntimeError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; the caller's when `None`.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Capability for running external programs synchronously.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, RuntimeError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        (**self).run(cmd)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        (**self).run(cmd)
    }
}

/// Runs commands on the host with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        debug!("running: {cmd}");
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .map_err(|source| RuntimeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        let out = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: cmd.to_string(),
                status: output
                    .status
                    .code()
                    .map_or_else(|| "terminated by signal".to_owned(), |c| format!("exit {c}")),
                output: format!("{}{}", out.stdout, out.stderr),
            });
        }
        Ok(out)
    }
}

/// Run commands in order, stopping at the first failure.
pub fn run_all(runner: &dyn CommandRunner, cmds: &[CommandSpec]) -> Result<(), RuntimeError> {
    for cmd in cmds {
        runner.run(cmd)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let cmd = CommandSpec::new("mount")
            .args(["-t", "proc"])
            .arg("proc-build")
            .path_arg(Path::new("/work/chroot/proc"));
        assert_eq!(cmd.to_string(), "mount -t proc proc-build /work/chroot/proc");
    }

    #[test]
    fn host_runner_captures_stdout() {
        let out = HostRunner
            .run(&CommandSpec::new("echo").arg("hello"))
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn host_runner_reports_failure_with_output() {
        let err = HostRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .unwrap_err();
        match err {
            RuntimeError::CommandFailed { status, output, .. } => {
                assert_eq!(status, "exit 3");
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn host_runner_honours_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = HostRunner
            .run(&CommandSpec::new("pwd").current_dir(dir.path()))
            .unwrap();
        assert_eq!(
            Path::new(out.stdout.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn host_runner_reports_missing_program() {
        let err = HostRunner
            .run(&CommandSpec::new("/nonexistent/cedar-test-binary"))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
