//! Configuration validation.
//!
//! Returns every problem at once, not just the first.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{DaemonConfig, DeclareKind};

/// Smallest pool that can hold the built-in groups and a few Blocks.
const MIN_SHM_CAPACITY: usize = 64 * 1024;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, addr: &str) {
    if addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{addr}' is not a socket address")));
    }
}

pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.store.shm_capacity < MIN_SHM_CAPACITY {
        errors.push(ValidationError::new(
            "store.shm_capacity",
            format!("must be at least {MIN_SHM_CAPACITY} bytes"),
        ));
    }
    if config.store.workers == 0 {
        errors.push(ValidationError::new("store.workers", "must be greater than 0"));
    }
    if config.store.update_interval_ms == 0 {
        errors.push(ValidationError::new("store.update_interval_ms", "must be greater than 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let mut seen = HashSet::new();
    for (i, decl) in config.declare.iter().enumerate() {
        let field = format!("declare[{i}]");
        if decl.group.is_empty() || decl.name.is_empty() {
            errors.push(ValidationError::new(&field, "group and name are required"));
        }
        if decl.group == "core" {
            errors.push(ValidationError::new(&field, "group 'core' is reserved"));
        }
        if !seen.insert((decl.group.as_str(), decl.name.as_str())) {
            errors.push(ValidationError::new(
                &field,
                format!("'{}.{}' is declared twice", decl.group, decl.name),
            ));
        }
        if let DeclareKind::Int { default, min, max } = decl.kind {
            if (min != 0 || max != 0) && !(min..=max).contains(&default) {
                errors.push(ValidationError::new(
                    &field,
                    format!("default {default} is outside [{min}, {max}]"),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DeclareConfig;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_config(&DaemonConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = DaemonConfig::default();
        config.store.workers = 0;
        config.admin.bind_address = "nowhere".into();
        config.observability.log_level = "loud".into();
        let decl = DeclareConfig {
            group: "pool".into(),
            name: "weight".into(),
            descr: String::new(),
            kind: DeclareKind::Int {
                default: 200,
                min: 0,
                max: 100,
            },
        };
        config.declare = vec![decl.clone(), decl];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "admin.bind_address",
                "store.workers",
                "observability.log_level",
                "declare[0]",
                "declare[1]",
                "declare[1]",
            ]
        );
    }
}
