use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QvmError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("missing argument 'name'")]
    MissingName,

    #[error("--iso is required for 'create'")]
    MissingIso,

    #[error("ISO file not found: {}", .path.display())]
    IsoNotFound { path: PathBuf },

    #[error("image already exists: {}", .path.display())]
    #[diagnostic(help("use --force to overwrite"))]
    ImageExists { path: PathBuf },

    #[error("disk image not found: {}", .path.display())]
    #[diagnostic(help("create the VM first with `qvm vm create <name> --iso <path>`"))]
    ImageNotFound { path: PathBuf },

    #[error("could not instantiate QEMU VM {name}: {reason}")]
    VmInstantiate { name: String, reason: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed (returncode={}): {stdout} {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ExternalCommand {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("could not connect to QMP socket {}", .path.display())]
    #[diagnostic(help(
        "the socket file exists but nothing accepted the connection; the VM may have exited \
         without cleanup, `qvm vm list` removes dangling sockets"
    ))]
    QmpConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("QMP I/O error while {context}")]
    QmpIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed QMP reply: {message}")]
    QmpDecode { message: String },

    #[error("QMP capability negotiation failed: {payload}")]
    QmpHandshake { payload: serde_json::Value },

    #[error("QMP command '{command}' failed: {payload}")]
    QmpCommand {
        command: String,
        payload: serde_json::Value,
    },
}
