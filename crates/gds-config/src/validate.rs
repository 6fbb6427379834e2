//! Configuration validation errors and semantic validation.

use crate::archive::ArchiveConfig;
use gds_common::StoreIdentifier;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::UnknownTable(_) => 13,
            ValidationError::InvalidValue { .. } => 14,
            ValidationError::MissingField(_) => 15,
        }
    }
}

impl From<ValidationError> for gds_common::Error {
    fn from(err: ValidationError) -> Self {
        gds_common::Error::Config(err.to_string())
    }
}

/// Validate an archive configuration semantically.
pub fn validate_archive_config(config: &ArchiveConfig) -> ValidationResult<()> {
    if config.row_limit == 0 {
        return Err(invalid("row_limit", "must be at least 1"));
    }
    if config.inserter.capacity == 0 {
        return Err(invalid("inserter.capacity", "must be at least 1"));
    }
    if config.inserter.append_wait_ms == 0 {
        return Err(invalid("inserter.append_wait_ms", "must be non-zero"));
    }
    if config.inserter.max_block_ms < config.inserter.append_wait_ms {
        return Err(invalid(
            "inserter.max_block_ms",
            "must be at least inserter.append_wait_ms",
        ));
    }
    if config.allocator.open_attempts == 0 {
        return Err(invalid("allocator.open_attempts", "must be at least 1"));
    }
    if config.allocator.directory_attempts == 0 {
        return Err(invalid("allocator.directory_attempts", "must be at least 1"));
    }

    let timings = &config.shutdown;
    for (field, value) in [
        ("shutdown.drain_poll_ms", timings.drain_poll_ms),
        ("shutdown.flush_poll_ms", timings.flush_poll_ms),
        ("shutdown.gatherer_join_ms", timings.gatherer_join_ms),
        ("shutdown.supervisor_join_ms", timings.supervisor_join_ms),
        ("shutdown.idle_check_ms", timings.idle_check_ms),
    ] {
        if value == 0 {
            return Err(invalid(field, "must be non-zero"));
        }
    }

    if config.extended.enabled && config.extended.postfix.is_empty() {
        return Err(ValidationError::MissingField("extended.postfix".to_string()));
    }

    for key in config.use_archive.keys() {
        if !is_use_archive_key(key) {
            return Err(ValidationError::UnknownTable(key.clone()));
        }
    }
    for table in &config.extended.tables {
        if StoreIdentifier::from_table_name(table).is_none() {
            return Err(ValidationError::UnknownTable(table.clone()));
        }
    }

    if config.export_dir.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("export_dir".to_string()));
    }

    Ok(())
}

fn is_use_archive_key(key: &str) -> bool {
    StoreIdentifier::ALL
        .iter()
        .any(|id| id.use_archive_key() == key)
}

fn invalid(field: &str, message: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        validate_archive_config(&ArchiveConfig::default()).unwrap();
    }

    #[test]
    fn test_zero_row_limit_rejected() {
        let config = ArchiveConfig {
            row_limit: 0,
            ..Default::default()
        };
        let err = validate_archive_config(&config).unwrap_err();
        assert_eq!(err.code(), 14);
        assert!(err.to_string().contains("row_limit"));
    }

    #[test]
    fn test_unknown_use_archive_key_rejected() {
        let mut config = ArchiveConfig::default();
        config.use_archive.insert("Telemetry".to_string(), true);
        let err = validate_archive_config(&config).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTable(ref t) if t == "Telemetry"));
    }

    #[test]
    fn test_sse_key_is_not_a_use_archive_key() {
        let mut config = ArchiveConfig::default();
        config.use_archive.insert("SseEvr".to_string(), true);
        assert!(validate_archive_config(&config).is_err());
    }

    #[test]
    fn test_extended_requires_postfix() {
        let mut config = ArchiveConfig::default();
        config.extended.enabled = true;
        config.extended.postfix.clear();
        let err = validate_archive_config(&config).unwrap_err();
        assert_eq!(err.code(), 15);
    }

    #[test]
    fn test_zero_join_ceiling_rejected() {
        let mut config = ArchiveConfig::default();
        config.shutdown.gatherer_join_ms = 0;
        assert!(validate_archive_config(&config).is_err());
    }

    #[test]
    fn test_converts_to_common_error() {
        let err: gds_common::Error = ValidationError::UnknownTable("X".into()).into();
        assert_eq!(err.code(), 10);
    }
}
