//! VM lifecycle commands.
//!
//! State is never stored: a VM is "running" exactly when its control socket
//! exists at the moment of the call (see [`VmManager::is_running`]). Commands
//! that need a running VM report [`Outcome::NotRunning`] instead of failing.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::SystemConfig;
use crate::error::QvmError;
use crate::process::{CommandSpec, Launcher};
use crate::qemu::{self, LaunchMode, LaunchSpec};
use crate::qmp::QmpSession;
use crate::registry::{self, Discovery};
use crate::{paths, util};

/// Monitor commands that take no arguments and return nothing of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Stop,
    Cont,
    Powerdown,
}

impl MonitorCommand {
    pub fn qmp_name(self) -> &'static str {
        match self {
            MonitorCommand::Stop => "stop",
            MonitorCommand::Cont => "cont",
            MonitorCommand::Powerdown => "system_powerdown",
        }
    }
}

/// What a lifecycle command did. "Not running" is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NotRunning { name: String },
    AlreadyRunning { name: String },
    Started { name: String, vnc_display: u16 },
    Created { name: String, image: PathBuf },
    Status(String),
    Sent { name: String, command: MonitorCommand },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NotRunning { name } => {
                write!(f, "VM {name} does not seem to run (no QMP socket).")
            }
            Outcome::AlreadyRunning { name } => write!(f, "VM {name} is already running."),
            Outcome::Started { name, vnc_display } => write!(
                f,
                "VM {name} started. Connect via VNC to :{vnc_display} (port {}).",
                qemu::vnc_port(*vnc_display)
            ),
            Outcome::Created { name, image } => {
                write!(f, "VM {name} exited; disk image at {}.", image.display())
            }
            Outcome::Status(status) => f.write_str(status),
            Outcome::Sent { name, command } => {
                write!(f, "Sent {} to VM {name}.", command.qmp_name())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub iso: PathBuf,
    pub size: String,
    pub vnc_display: u16,
    pub bridge: String,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub vnc_display: u16,
    pub bridge: String,
}

pub struct VmManager<'a, L> {
    sys: &'a SystemConfig,
    launcher: &'a L,
}

impl<'a, L: Launcher> VmManager<'a, L> {
    pub fn new(sys: &'a SystemConfig, launcher: &'a L) -> Self {
        Self { sys, launcher }
    }

    /// The single running check. Racy by nature: another invocation may
    /// start or stop the VM between this check and the action that follows.
    pub fn is_running(&self, name: &str) -> bool {
        paths::socket_path(&self.sys.layout, name).exists()
    }

    pub async fn list(&self) -> Result<Discovery, QvmError> {
        registry::list_running(&self.sys.layout, self.launcher, self.sys.privilege_cmd()).await
    }

    /// Create a disk image and boot the installer ISO in the foreground.
    ///
    /// Returns once the QEMU process exits.
    pub async fn create(&self, name: &str, opts: &CreateOptions) -> Result<Outcome, QvmError> {
        util::validate_name(name)?;
        if !opts.iso.exists() {
            return Err(QvmError::IsoNotFound {
                path: opts.iso.clone(),
            });
        }
        let image = paths::image_path(&self.sys.layout, name);
        if image.exists() && !opts.force {
            return Err(QvmError::ImageExists { path: image });
        }
        util::parse_size(&opts.size)?;

        if let Some(dir) = image.parent() {
            std::fs::create_dir_all(dir).map_err(|e| QvmError::Io {
                context: format!("creating directory {}", dir.display()),
                source: e,
            })?;
        }

        let machine = self.sys.machine();
        self.launcher
            .run(&qemu::create_image_command(machine, &image, &opts.size))
            .await?;
        tracing::info!(name, path = %image.display(), size = %opts.size, "created disk image");

        println!(
            "Creating VM '{name}' with {} disk from {}",
            opts.size,
            opts.iso.display()
        );
        println!(
            "Connect via VNC to :{} (port {})",
            opts.vnc_display,
            qemu::vnc_port(opts.vnc_display)
        );

        let socket = paths::socket_path(&self.sys.layout, name);
        let pid_file = paths::pid_file_path(&self.sys.layout, name);
        let spec = LaunchSpec {
            name,
            image: &image,
            socket: &socket,
            pid_file: &pid_file,
            bridge: &opts.bridge,
            vnc_display: opts.vnc_display,
            mode: LaunchMode::Install {
                iso: opts.iso.clone(),
            },
        };
        let cmd = qemu::launch_command(machine, &spec).privileged(self.sys.privilege_cmd());
        self.launcher.run(&cmd).await?;

        Ok(Outcome::Created {
            name: name.to_string(),
            image,
        })
    }

    /// Boot an existing VM in the background.
    pub async fn start(&self, name: &str, opts: &StartOptions) -> Result<Outcome, QvmError> {
        util::validate_name(name)?;
        if self.is_running(name) {
            return Ok(Outcome::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let image = paths::image_path(&self.sys.layout, name);
        if !image.exists() {
            return Err(QvmError::ImageNotFound { path: image });
        }

        let socket = paths::socket_path(&self.sys.layout, name);
        let pid_file = paths::pid_file_path(&self.sys.layout, name);
        let spec = LaunchSpec {
            name,
            image: &image,
            socket: &socket,
            pid_file: &pid_file,
            bridge: &opts.bridge,
            vnc_display: opts.vnc_display,
            mode: LaunchMode::Daemon,
        };
        let privilege_cmd = self.sys.privilege_cmd();
        let cmd = qemu::launch_command(self.sys.machine(), &spec).privileged(privilege_cmd);
        self.launcher.run(&cmd).await?;
        tracing::info!(name, socket = %socket.display(), "VM launched");

        // QEMU ran as root and created root-owned artifacts.
        if privilege_cmd.is_some() {
            for artifact in [&socket, &pid_file] {
                self.reclaim(artifact).await?;
            }
        }

        Ok(Outcome::Started {
            name: name.to_string(),
            vnc_display: opts.vnc_display,
        })
    }

    pub async fn state(&self, name: &str) -> Result<Outcome, QvmError> {
        let Some(mut session) = self.session(name).await? else {
            return Ok(Outcome::NotRunning {
                name: name.to_string(),
            });
        };
        Ok(Outcome::Status(session.query_status().await?))
    }

    /// Issue `stop`, `cont` or `system_powerdown`.
    pub async fn monitor(&self, name: &str, command: MonitorCommand) -> Result<Outcome, QvmError> {
        let Some(mut session) = self.session(name).await? else {
            return Ok(Outcome::NotRunning {
                name: name.to_string(),
            });
        };
        session.execute(command.qmp_name()).await?;
        tracing::info!(name, command = command.qmp_name(), "monitor command sent");
        Ok(Outcome::Sent {
            name: name.to_string(),
            command,
        })
    }

    pub async fn stop(&self, name: &str) -> Result<Outcome, QvmError> {
        self.monitor(name, MonitorCommand::Stop).await
    }

    pub async fn cont(&self, name: &str) -> Result<Outcome, QvmError> {
        self.monitor(name, MonitorCommand::Cont).await
    }

    pub async fn powerdown(&self, name: &str) -> Result<Outcome, QvmError> {
        self.monitor(name, MonitorCommand::Powerdown).await
    }

    /// Open a session when the VM is running, `None` otherwise.
    async fn session(&self, name: &str) -> Result<Option<QmpSession>, QvmError> {
        util::validate_socket_name(name)?;
        if !self.is_running(name) {
            tracing::debug!(name, "no control socket");
            return Ok(None);
        }
        let socket = paths::socket_path(&self.sys.layout, name);
        QmpSession::connect(&socket).await.map(Some)
    }

    async fn reclaim(&self, path: &Path) -> Result<(), QvmError> {
        let owner = current_owner();
        let chown = CommandSpec::new("chown")
            .arg(&owner)
            .arg(path)
            .privileged(self.sys.privilege_cmd());
        self.launcher.run(&chown).await?;
        tracing::debug!(path = %path.display(), owner = %owner, "reclaimed ownership");
        Ok(())
    }
}

/// `uid:gid` of the invoking user.
fn current_owner() -> String {
    // SAFETY: getuid/getgid cannot fail and have no preconditions.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    format!("{uid}:{gid}")
}
