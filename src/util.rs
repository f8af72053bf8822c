use crate::error::QvmError;

/// Parse a QEMU-style size string (`"20G"`, `"512M"`, `"4096"`) into bytes.
///
/// Binary units, matching what `qemu-img` and `-m` accept. A bare number is bytes.
pub fn parse_size(s: &str) -> Result<u64, QvmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QvmError::Validation {
            message: "size cannot be empty".into(),
        });
    }

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };

    let value: u64 = digits.parse().map_err(|_| QvmError::Validation {
        message: format!("invalid size '{s}'"),
    })?;

    let shift = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" => 10,
        "M" | "MB" => 20,
        "G" | "GB" => 30,
        "T" | "TB" => 40,
        _ => {
            return Err(QvmError::Validation {
                message: format!("unknown size suffix '{unit}' in '{s}' (use K, M, G or T)"),
            });
        }
    };

    if value == 0 {
        return Err(QvmError::Validation {
            message: format!("size must be greater than zero (got '{s}')"),
        });
    }

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| QvmError::Validation {
            message: format!("size overflows: '{s}'"),
        })
}

/// VM names end up in file names and QEMU `-name` arguments, so they are kept
/// to a conservative character set.
pub fn validate_name(name: &str) -> Result<(), QvmError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(QvmError::Validation {
            message: format!(
                "invalid VM name '{name}': use letters, digits, '.', '_' or '-', starting with a letter or digit"
            ),
        });
    }
    Ok(())
}

/// Looser check for commands that only address an existing control socket.
///
/// Discovery lists any `qmp-<name>` socket, including ones created by other
/// tools with names `validate_name` would refuse; those must stay reachable.
/// Only names that would escape the sockets directory are rejected.
pub fn validate_socket_name(name: &str) -> Result<(), QvmError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(QvmError::Validation {
            message: format!("invalid VM name '{name}': not usable as a socket file name"),
        });
    }
    Ok(())
}
