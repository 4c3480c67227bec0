//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or a field has the wrong type.
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The merged settings describe a server that cannot run.
    #[error("invalid `{key}`: {reason}")]
    InvalidValue {
        /// Settings key, as spelled in `settings.json`.
        key: &'static str,
        /// What the value must satisfy.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/beacon.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /etc/beacon.json: denied");
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::invalid("idleTimeoutMs", "must be positive");
        assert_eq!(err.to_string(), "invalid `idleTimeoutMs`: must be positive");
        assert!(matches!(
            err,
            SettingsError::InvalidValue { key: "idleTimeoutMs", .. }
        ));
    }
}
