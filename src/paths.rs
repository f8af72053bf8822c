use std::path::PathBuf;

use crate::config::Layout;

/// Prefix shared by every control-socket file name.
pub const SOCKET_PREFIX: &str = "qmp-";

/// Control socket for a VM: `<sockets>/qmp-<name>`.
pub fn socket_path(layout: &Layout, name: &str) -> PathBuf {
    layout.sockets_dir.join(format!("{SOCKET_PREFIX}{name}"))
}

/// PID file written by QEMU: `<pids>/qemu-<name>.pid`.
pub fn pid_file_path(layout: &Layout, name: &str) -> PathBuf {
    layout.pid_dir.join(format!("qemu-{name}.pid"))
}

/// Disk image: `<images>/<name>.vmdk`.
pub fn image_path(layout: &Layout, name: &str) -> PathBuf {
    layout.images_dir.join(format!("{name}.vmdk"))
}

/// Log file written by launching commands.
pub fn log_file(layout: &Layout) -> PathBuf {
    layout.logs_dir.join("qvm.log")
}

/// Recover the VM name from a control-socket file name.
pub fn vm_name_from_socket(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(SOCKET_PREFIX)
        .filter(|name| !name.is_empty())
}
