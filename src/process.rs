//! External command execution.
//!
//! Everything the VM commands run on the host (`qemu-img`, QEMU itself,
//! ownership fixes) goes through [`Launcher`], so the lifecycle logic can be
//! exercised without spawning real processes.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;

use crate::error::QvmError;

/// A program plus its arguments, run without a shell.
///
/// Arguments are kept as `OsString` so paths reach the program byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        for a in args {
            self = self.arg(a);
        }
        self
    }

    /// Run through `privilege_cmd` (e.g. `sudo`) when one is configured.
    pub fn privileged(self, privilege_cmd: Option<&str>) -> Self {
        match privilege_cmd {
            Some(prefix) => CommandSpec::new(prefix).arg(&self.program).args(&self.args),
            None => self,
        }
    }

    /// The program name without a privilege prefix or directory.
    pub fn display_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            let a = a.to_string_lossy();
            if a.is_empty() || a.contains(char::is_whitespace) {
                write!(f, " '{a}'")?;
            } else {
                write!(f, " {a}")?;
            }
        }
        Ok(())
    }
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Launcher {
    /// Run to completion. Returns captured stdout; a non-zero exit is an error.
    async fn run(&self, cmd: &CommandSpec) -> Result<String, QvmError>;
}

/// Runs commands on the host via `tokio::process`.
pub struct HostLauncher;

impl Launcher for HostLauncher {
    async fn run(&self, cmd: &CommandSpec) -> Result<String, QvmError> {
        tracing::info!(command = %cmd, "running");

        let output = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .await
            .map_err(|e| QvmError::Io {
                context: format!("running {}", cmd.program),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::error!(
                command = %cmd,
                code = ?output.status.code(),
                stdout = %stdout.trim(),
                stderr = %stderr.trim(),
                "command failed"
            );
            return Err(QvmError::ExternalCommand {
                command: cmd.to_string(),
                code: output.status.code(),
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::debug!(command = cmd.display_name(), "command succeeded");
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_prefixes_the_program() {
        let cmd = CommandSpec::new("chown")
            .arg("1000:1000")
            .arg("/tmp/qmp-a")
            .privileged(Some("sudo"));
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.args, ["chown", "1000:1000", "/tmp/qmp-a"]);
    }

    #[test]
    fn unprivileged_is_unchanged() {
        let cmd = CommandSpec::new("qemu-img").arg("info").privileged(None);
        assert_eq!(cmd, CommandSpec::new("qemu-img").arg("info"));
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = CommandSpec::new("rm").arg("/tmp/a b").arg("-f");
        assert_eq!(cmd.to_string(), "rm '/tmp/a b' -f");
    }

    #[test]
    fn non_utf8_arguments_are_kept_verbatim() {
        use std::os::unix::ffi::OsStrExt;

        let iso = OsStr::from_bytes(b"/iso/inst\xffall.iso");
        let cmd = CommandSpec::new("qemu-system-x86_64")
            .arg("-cdrom")
            .arg(iso)
            .privileged(Some("sudo"));
        assert_eq!(cmd.args[2].as_os_str(), iso);
        assert!(cmd.to_string().ends_with("/iso/inst\u{FFFD}all.iso"));
    }

    #[tokio::test]
    async fn host_launcher_captures_stdout() {
        let out = HostLauncher
            .run(&CommandSpec::new("echo").arg("hello"))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn host_launcher_reports_failure() {
        let cmd = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        match HostLauncher.run(&cmd).await {
            Err(QvmError::ExternalCommand {
                code,
                stdout,
                stderr,
                ..
            }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "out");
                assert_eq!(stderr, "err");
            }
            other => panic!("expected external command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let result = HostLauncher
            .run(&CommandSpec::new("/nonexistent/qvm-test-binary"))
            .await;
        assert!(matches!(result, Err(QvmError::Io { .. })));
    }
}
