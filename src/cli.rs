use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qvm", about = "Personal QEMU VM control over QMP")]
pub struct Cli {
    /// Path to config file (default: ~/.config/qvm/qvm.toml, if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage QEMU virtual machines
    Vm(VmArgs),
}

#[derive(Args, Debug)]
pub struct VmArgs {
    /// Lifecycle action
    #[arg(value_enum)]
    pub action: VmAction,

    /// VM name (required for everything but `list`)
    pub name: Option<String>,

    /// Path to installation ISO (create)
    #[arg(long)]
    pub iso: Option<PathBuf>,

    /// Disk image size (create)
    #[arg(long, default_value = "20G")]
    pub size: String,

    /// VNC display number, port = 5900 + N (default from config)
    #[arg(long)]
    pub vnc_display: Option<u16>,

    /// Network bridge to attach the VM to (default from config)
    #[arg(long)]
    pub bridge: Option<String>,

    /// Overwrite an existing disk image (create)
    #[arg(long)]
    pub force: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmAction {
    /// List running VMs
    List,
    /// Create a disk image and boot the installer ISO
    Create,
    /// Start an existing VM in the background
    Start,
    /// Print the VM run state
    State,
    /// Pause the VM
    Stop,
    /// Resume a paused VM
    Cont,
    /// Send an ACPI power-down request
    Powerdown,
}

impl VmAction {
    /// Actions that spawn QEMU and get a log file.
    pub fn launches(self) -> bool {
        matches!(self, VmAction::Create | VmAction::Start)
    }
}
