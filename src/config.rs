use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::QvmError;
use crate::util;

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub paths: PathsConfig,
    #[facet(default)]
    pub machine: MachineConfig,
    #[facet(default)]
    pub advanced: AdvancedConfig,
}

/// Directory overrides. Empty strings fall back to the built-in locations.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct PathsConfig {
    #[facet(default)]
    pub sockets: String,
    #[facet(default)]
    pub pids: String,
    #[facet(default)]
    pub images: String,
    #[facet(default)]
    pub logs: String,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct MachineConfig {
    #[facet(default = "qemu-system-x86_64")]
    pub qemu: String,
    #[facet(default = "qemu-img")]
    pub qemu_img: String,
    #[facet(default = "kvm")]
    pub accel: String,
    #[facet(default = "host")]
    pub cpu: String,
    #[facet(default = "4G")]
    pub memory: String,
    #[facet(default = "e1000")]
    pub nic: String,
    #[facet(default = "bridge0")]
    pub bridge: String,
    #[facet(default)]
    pub vnc_display: u16,
    /// Empty disables USB passthrough.
    #[facet(default = "0x04e8")]
    pub usb_vendor_id: String,
    #[facet(default = "0x3321")]
    pub usb_product_id: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            qemu: "qemu-system-x86_64".into(),
            qemu_img: "qemu-img".into(),
            accel: "kvm".into(),
            cpu: "host".into(),
            memory: "4G".into(),
            nic: "e1000".into(),
            bridge: "bridge0".into(),
            vnc_display: 0,
            usb_vendor_id: "0x04e8".into(),
            usb_product_id: "0x3321".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct AdvancedConfig {
    /// Prefix for commands that need root. Empty runs everything as the invoking user.
    #[facet(default = "sudo")]
    pub privilege_cmd: String,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            privilege_cmd: "sudo".into(),
        }
    }
}

// ── Layout ────────────────────────────────────────────────

/// Resolved directories the VM artifacts live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub sockets_dir: PathBuf,
    pub pid_dir: PathBuf,
    pub images_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            sockets_dir: PathBuf::from("/tmp"),
            pid_dir: PathBuf::from("/var/run"),
            images_dir: home.join("images").join("hdimages"),
            logs_dir: dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("qvm"),
        }
    }
}

// ── SystemConfig ──────────────────────────────────────────

/// Parsed config plus the directory layout derived from it.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Config file the values came from, `None` when running on defaults.
    pub config_path: Option<PathBuf>,
    pub layout: Layout,
    pub config: Config,
}

impl SystemConfig {
    pub fn from_config(config: Config, config_path: Option<PathBuf>) -> Self {
        let defaults = Layout::default();
        let pick = |value: &str, fallback: PathBuf| {
            if value.is_empty() {
                fallback
            } else {
                expand_home(value)
            }
        };
        let layout = Layout {
            sockets_dir: pick(&config.paths.sockets, defaults.sockets_dir),
            pid_dir: pick(&config.paths.pids, defaults.pid_dir),
            images_dir: pick(&config.paths.images, defaults.images_dir),
            logs_dir: pick(&config.paths.logs, defaults.logs_dir),
        };
        Self {
            config_path,
            layout,
            config,
        }
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.config.machine
    }

    /// Privilege escalation prefix, `None` when disabled.
    pub fn privilege_cmd(&self) -> Option<&str> {
        let cmd = self.config.advanced.privilege_cmd.as_str();
        (!cmd.is_empty()).then_some(cmd)
    }
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(rest),
        None => PathBuf::from(value),
    }
}

// ── loading ───────────────────────────────────────────────

/// Default config location: `~/.config/qvm/qvm.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("qvm").join("qvm.toml"))
}

/// Load the config.
///
/// An explicit path must exist. Without one, the default location is used
/// when present and built-in defaults otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<SystemConfig, QvmError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => {
                tracing::debug!("no config file, using defaults");
                return Ok(SystemConfig::from_config(Config::default(), None));
            }
        },
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| QvmError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&contents).map_err(|e| match e {
        QvmError::ConfigParse { message, .. } => QvmError::ConfigParse {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })?;

    tracing::debug!(path = %path.display(), "loaded config");
    Ok(SystemConfig::from_config(config, Some(path)))
}

fn parse_config(contents: &str) -> Result<Config, QvmError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| QvmError::ConfigParse {
        path: String::new(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), QvmError> {
    let machine = &config.machine;

    util::parse_size(&machine.memory).map_err(|_| QvmError::Validation {
        message: format!("machine.memory is not a valid size (got '{}')", machine.memory),
    })?;

    for (field, value) in [
        ("machine.qemu", &machine.qemu),
        ("machine.qemu_img", &machine.qemu_img),
        ("machine.accel", &machine.accel),
        ("machine.cpu", &machine.cpu),
        ("machine.nic", &machine.nic),
        ("machine.bridge", &machine.bridge),
    ] {
        if value.trim().is_empty() {
            return Err(QvmError::Validation {
                message: format!("{field} must not be empty"),
            });
        }
    }

    if machine.usb_vendor_id.is_empty() != machine.usb_product_id.is_empty() {
        return Err(QvmError::Validation {
            message: "machine.usb_vendor_id and machine.usb_product_id must be set together".into(),
        });
    }

    if config.advanced.privilege_cmd.contains(char::is_whitespace) {
        return Err(QvmError::Validation {
            message: format!(
                "advanced.privilege_cmd must be a single program (got '{}')",
                config.advanced.privilege_cmd
            ),
        });
    }

    Ok(())
}
