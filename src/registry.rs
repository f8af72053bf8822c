//! Discovery of running VMs from control-socket and PID-file artifacts.
//!
//! There is no registry on disk: a VM is considered running when its control
//! socket exists in the sockets directory, and it is listed only when its PID
//! file can be read as well. Sockets without a readable PID file are left
//! behind by VMs that died without cleanup and are removed during the scan.

use std::fmt;
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::error::QvmError;
use crate::paths;
use crate::process::{CommandSpec, Launcher};

/// A VM believed to be running. Only lives for the duration of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub name: String,
    pub socket: PathBuf,
    pub pid: u32,
}

impl VmHandle {
    /// Build a handle from the artifacts of `name`.
    ///
    /// Fails with [`QvmError::VmInstantiate`] when the PID file is missing,
    /// unreadable, or does not contain a process id.
    pub fn open(layout: &Layout, name: &str) -> Result<Self, QvmError> {
        let pid_file = paths::pid_file_path(layout, name);
        let instantiate = |reason: String| QvmError::VmInstantiate {
            name: name.to_string(),
            reason,
        };

        let contents = std::fs::read_to_string(&pid_file)
            .map_err(|e| instantiate(format!("{}: {e}", pid_file.display())))?;
        let pid = contents.trim().parse::<u32>().map_err(|_| {
            instantiate(format!(
                "{} does not contain a process id ({:?})",
                pid_file.display(),
                contents.trim()
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            socket: paths::socket_path(layout, name),
            pid,
        })
    }
}

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let socket = self
            .socket
            .canonicalize()
            .unwrap_or_else(|_| self.socket.clone());
        write!(f, "{} ({}): {}", self.name, self.pid, socket.display())
    }
}

/// A control socket whose VM could not be instantiated.
#[derive(Debug)]
pub struct StaleArtifact {
    pub name: String,
    pub socket: PathBuf,
    pub reason: QvmError,
    /// Whether the socket file is gone after cleanup.
    pub removed: bool,
}

/// Result of a scan: live VMs in directory order, plus what was pruned.
#[derive(Debug, Default)]
pub struct Discovery {
    pub running: Vec<VmHandle>,
    pub pruned: Vec<StaleArtifact>,
}

/// Scan the sockets directory for running VMs.
///
/// One bad entry never aborts the scan. Dangling sockets are deleted, through
/// the privilege command when the socket is owned by root.
pub async fn list_running<L: Launcher>(
    layout: &Layout,
    launcher: &L,
    privilege_cmd: Option<&str>,
) -> Result<Discovery, QvmError> {
    scan(layout, launcher, privilege_cmd, |socket| std::fs::remove_file(socket)).await
}

/// [`list_running`] with the direct unlink supplied by the caller.
async fn scan<L, U>(
    layout: &Layout,
    launcher: &L,
    privilege_cmd: Option<&str>,
    unlink: U,
) -> Result<Discovery, QvmError>
where
    L: Launcher,
    U: Fn(&Path) -> std::io::Result<()>,
{
    let entries = std::fs::read_dir(&layout.sockets_dir).map_err(|e| QvmError::Io {
        context: format!("reading {}", layout.sockets_dir.display()),
        source: e,
    })?;

    let mut discovery = Discovery::default();

    for entry in entries.filter_map(Result::ok) {
        let is_socket = entry.file_type().is_ok_and(|t| t.is_socket());
        if !is_socket {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(paths::vm_name_from_socket) else {
            continue;
        };

        match VmHandle::open(layout, name) {
            Ok(handle) => {
                tracing::debug!(name, pid = handle.pid, "found running VM");
                discovery.running.push(handle);
            }
            Err(reason) => {
                let socket = entry.path();
                tracing::debug!(name, error = %reason, "dangling control socket");
                let removed = remove_socket(&socket, launcher, privilege_cmd, &unlink).await;
                discovery.pruned.push(StaleArtifact {
                    name: name.to_string(),
                    socket,
                    reason,
                    removed,
                });
            }
        }
    }

    Ok(discovery)
}

async fn remove_socket<L, U>(
    socket: &Path,
    launcher: &L,
    privilege_cmd: Option<&str>,
    unlink: &U,
) -> bool
where
    L: Launcher,
    U: Fn(&Path) -> std::io::Result<()>,
{
    match unlink(socket) {
        Ok(()) => {
            tracing::info!(path = %socket.display(), "removed dangling socket");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) if e.kind() == ErrorKind::PermissionDenied && privilege_cmd.is_some() => {
            let rm = CommandSpec::new("rm")
                .arg("-f")
                .arg(socket)
                .privileged(privilege_cmd);
            match launcher.run(&rm).await {
                Ok(_) => {
                    tracing::info!(path = %socket.display(), "removed dangling socket");
                    true
                }
                Err(e) => {
                    tracing::warn!(path = %socket.display(), error = %e, "could not remove dangling socket");
                    false
                }
            }
        }
        Err(e) => {
            tracing::warn!(path = %socket.display(), error = %e, "could not remove dangling socket");
            false
        }
    }
}
