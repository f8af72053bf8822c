use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn qvm() -> assert_cmd::Command {
    cargo_bin_cmd!("qvm").into()
}

/// Config pointing every directory into `dir`, with no privilege escalation.
fn write_test_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    for sub in ["sockets", "run", "images", "logs"] {
        std::fs::create_dir_all(dir.path().join(sub)).unwrap();
    }
    let config_path = dir.path().join("qvm.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(
        f,
        r#"
[paths]
sockets = "{root}/sockets"
pids = "{root}/run"
images = "{root}/images"
logs = "{root}/logs"

[machine]
qemu = "/nonexistent/qemu-system-x86_64"
qemu_img = "/nonexistent/qemu-img"

[advanced]
privilege_cmd = ""
"#,
        root = dir.path().display()
    )
    .unwrap();
    config_path
}

#[test]
fn help_works() {
    qvm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("QEMU VM control"));
}

#[test]
fn missing_config_shows_error() {
    qvm()
        .args(["--config", "/nonexistent/qvm.toml", "vm", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn missing_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);

    qvm()
        .args(["--config", config_path.to_str().unwrap(), "vm", "state"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing argument 'name'"));
}

#[test]
fn state_of_stopped_vm_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);

    for action in ["state", "stop", "cont", "powerdown"] {
        qvm()
            .args(["--config", config_path.to_str().unwrap(), "vm", action, "vmA"])
            .assert()
            .success()
            .stdout(predicate::str::contains("does not seem to run"));
    }
}

#[test]
fn create_requires_iso() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);

    qvm()
        .args(["--config", config_path.to_str().unwrap(), "vm", "create", "vmA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--iso is required"));
}

#[test]
fn create_with_missing_iso_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    let iso = dir.path().join("missing.iso");

    qvm()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "vm",
            "create",
            "vmA",
            "--iso",
            iso.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ISO file not found"));
}

#[test]
fn create_refuses_existing_image() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    let iso = dir.path().join("install.iso");
    std::fs::write(&iso, b"iso").unwrap();
    let image = dir.path().join("images").join("vmA.vmdk");
    std::fs::write(&image, b"disk").unwrap();

    qvm()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "vm",
            "create",
            "vmA",
            "--iso",
            iso.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("image already exists"));

    assert_eq!(std::fs::read(&image).unwrap(), b"disk");
}

#[test]
fn list_with_no_vms_prints_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);

    qvm()
        .args(["--config", config_path.to_str().unwrap(), "vm", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn list_prunes_socket_without_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    let socket = dir.path().join("sockets").join("qmp-crashed");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());

    qvm()
        .args(["--config", config_path.to_str().unwrap(), "vm", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("could not instantiate QEMU VM crashed"));

    assert!(!socket.exists());
}

#[test]
fn start_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    std::fs::write(dir.path().join("images").join("vmA.vmdk"), b"disk").unwrap();

    qvm()
        .args(["--config", config_path.to_str().unwrap(), "vm", "start", "vmA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("running /nonexistent/qemu-system-x86_64"));
}

#[test]
fn list_reports_each_dangling_socket_once() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_test_config(&dir);
    let socket = dir.path().join("sockets").join("qmp-crashed");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());

    let output = qvm()
        .env_remove("RUST_LOG")
        .args(["--config", config_path.to_str().unwrap(), "vm", "list"])
        .assert()
        .success()
        .get_output()
        .stderr
        .clone();

    let stderr = String::from_utf8(output).unwrap();
    assert_eq!(stderr.matches("could not instantiate QEMU VM crashed").count(), 1);
}
