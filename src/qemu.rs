//! QEMU and `qemu-img` command lines.

use std::path::{Path, PathBuf};

use crate::config::MachineConfig;
use crate::process::CommandSpec;

/// Base VNC TCP port; display `:N` listens on `5900 + N`.
pub const VNC_BASE_PORT: u32 = 5900;

pub fn vnc_port(display: u16) -> u32 {
    VNC_BASE_PORT + u32::from(display)
}

/// `qemu-img create -f vmdk <image> <size>`
pub fn create_image_command(machine: &MachineConfig, image: &Path, size: &str) -> CommandSpec {
    CommandSpec::new(&machine.qemu_img)
        .args(["create", "-f", "vmdk"])
        .arg(image)
        .arg(size)
}

/// How a VM process is being launched.
#[derive(Debug, Clone)]
pub enum LaunchMode {
    /// Foreground install boot from an ISO attached as CD-ROM.
    Install { iso: PathBuf },
    /// Background boot from the disk image; QEMU daemonizes itself.
    Daemon,
}

/// Everything needed to build a QEMU invocation for one VM.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
    pub name: &'a str,
    pub image: &'a Path,
    pub socket: &'a Path,
    pub pid_file: &'a Path,
    pub bridge: &'a str,
    pub vnc_display: u16,
    pub mode: LaunchMode,
}

/// Build the `qemu-system-*` command line.
pub fn launch_command(machine: &MachineConfig, spec: &LaunchSpec<'_>) -> CommandSpec {
    let name = spec.name;
    let nic = &machine.nic;

    let mut cmd = CommandSpec::new(&machine.qemu)
        .args(["-accel", machine.accel.as_str()])
        .args(["-cpu", machine.cpu.as_str()])
        .args(["-m", machine.memory.as_str()])
        .arg("-netdev")
        .arg(format!("bridge,id=net0,br={}", spec.bridge))
        .arg("-device")
        .arg(format!("{nic},netdev=net0"))
        .args(["-netdev", "user,id=net1"])
        .arg("-device")
        .arg(format!("{nic},netdev=net1"))
        .arg("-drive")
        .arg(format!(
            "file={},format=vmdk,if=virtio",
            spec.image.display()
        ));

    if let LaunchMode::Install { iso } = &spec.mode {
        cmd = cmd.arg("-cdrom").arg(iso).args(["-boot", "d"]);
    }

    cmd = cmd.args(["-device", "usb-ehci,id=ehci"]);
    if !machine.usb_vendor_id.is_empty() {
        cmd = cmd.arg("-device").arg(format!(
            "usb-host,vendorid={},productid={}",
            machine.usb_vendor_id, machine.usb_product_id
        ));
    }

    cmd = cmd
        .arg("-name")
        .arg(format!("qemu-vm-{name},process=vm-{name}"));

    if matches!(spec.mode, LaunchMode::Daemon) {
        cmd = cmd.args(["-daemonize", "-serial", "none"]);
    }

    cmd.arg("-display")
        .arg(format!("vnc=:{}", spec.vnc_display))
        .arg("-qmp")
        .arg(format!("unix:{},server=on,wait=off", spec.socket.display()))
        .arg("-pidfile")
        .arg(spec.pid_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: LaunchMode) -> LaunchSpec<'static> {
        LaunchSpec {
            name: "vmA",
            image: Path::new("/img/vmA.vmdk"),
            socket: Path::new("/tmp/qmp-vmA"),
            pid_file: Path::new("/var/run/qemu-vmA.pid"),
            bridge: "bridge0",
            vnc_display: 2,
            mode,
        }
    }

    /// Value following `flag`, for every occurrence.
    fn values<'a>(cmd: &'a CommandSpec, flag: &str) -> Vec<&'a str> {
        cmd.args
            .windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].to_str().unwrap())
            .collect()
    }

    #[test]
    fn image_command() {
        let cmd = create_image_command(&MachineConfig::default(), Path::new("/img/vmA.vmdk"), "10G");
        assert_eq!(cmd.to_string(), "qemu-img create -f vmdk /img/vmA.vmdk 10G");
    }

    #[test]
    fn daemon_launch_arguments() {
        let cmd = launch_command(&MachineConfig::default(), &spec(LaunchMode::Daemon));
        assert_eq!(cmd.program, "qemu-system-x86_64");
        assert_eq!(values(&cmd, "-accel"), ["kvm"]);
        assert_eq!(values(&cmd, "-cpu"), ["host"]);
        assert_eq!(values(&cmd, "-m"), ["4G"]);
        assert_eq!(
            values(&cmd, "-netdev"),
            ["bridge,id=net0,br=bridge0", "user,id=net1"]
        );
        assert_eq!(
            values(&cmd, "-device"),
            [
                "e1000,netdev=net0",
                "e1000,netdev=net1",
                "usb-ehci,id=ehci",
                "usb-host,vendorid=0x04e8,productid=0x3321"
            ]
        );
        assert_eq!(
            values(&cmd, "-drive"),
            ["file=/img/vmA.vmdk,format=vmdk,if=virtio"]
        );
        assert_eq!(values(&cmd, "-name"), ["qemu-vm-vmA,process=vm-vmA"]);
        assert_eq!(values(&cmd, "-serial"), ["none"]);
        assert!(cmd.args.iter().any(|a| a == "-daemonize"));
        assert_eq!(values(&cmd, "-display"), ["vnc=:2"]);
        assert_eq!(
            values(&cmd, "-qmp"),
            ["unix:/tmp/qmp-vmA,server=on,wait=off"]
        );
        assert_eq!(values(&cmd, "-pidfile"), ["/var/run/qemu-vmA.pid"]);
        assert!(values(&cmd, "-cdrom").is_empty());
    }

    #[test]
    fn install_launch_boots_from_cdrom() {
        let cmd = launch_command(
            &MachineConfig::default(),
            &spec(LaunchMode::Install {
                iso: PathBuf::from("/iso/debian.iso"),
            }),
        );
        assert_eq!(values(&cmd, "-cdrom"), ["/iso/debian.iso"]);
        assert_eq!(values(&cmd, "-boot"), ["d"]);
        assert!(!cmd.args.iter().any(|a| a == "-daemonize"));
    }

    #[test]
    fn usb_passthrough_can_be_disabled() {
        let machine = MachineConfig {
            usb_vendor_id: String::new(),
            usb_product_id: String::new(),
            ..MachineConfig::default()
        };
        let cmd = launch_command(&machine, &spec(LaunchMode::Daemon));
        assert!(!cmd.args.iter().any(|a| a.to_string_lossy().starts_with("usb-host")));
    }

    #[test]
    fn vnc_ports() {
        assert_eq!(vnc_port(0), 5900);
        assert_eq!(vnc_port(7), 5907);
    }
}
