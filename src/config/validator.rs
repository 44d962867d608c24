//! Configuration validation.
//!
//! Collects every problem in one pass so `check` can show them together:
//! missing required keys, malformed typed values, and resource names the
//! Google Cloud APIs would reject.

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::sections::{SectionName, SectionRegistry};

use super::keys::{self, RuntimeSettings};
use super::store::{ConfigStore, MIN_SECRET_LEN, Namespace};

/// Validator for loaded configuration.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    registry: SectionRegistry,
}

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Keys that are required but missing or empty.
    pub missing: Vec<String>,
    /// Malformed or unacceptable values.
    pub errors: Vec<ValidationError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The key that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator over the built-in section catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: SectionRegistry::new(),
        }
    }

    /// Validates configuration, collecting every problem.
    #[must_use]
    pub fn validate(&self, config: &ConfigStore) -> ValidationResult {
        let mut result = ValidationResult::default();

        for key in keys::REQUIRED_BASE {
            if !config.contains(key) {
                result.missing.push((*key).to_string());
            }
        }

        if let Err(err) = RuntimeSettings::from_config(config) {
            result.push_error(&err);
        }

        for section in self.registry.all() {
            match section.is_enabled(config) {
                Ok(true) => Self::validate_section(section.name, config, &mut result),
                Ok(false) => {}
                Err(err) => result.push_error(&err),
            }
        }

        Self::validate_names(config, &mut result);
        Self::validate_secret_values(config, &mut result);
        Self::validate_unknown_keys(config, &mut result);

        result.missing.sort();
        result.missing.dedup();
        result.errors.dedup();
        debug!(
            "Validation finished: {} missing, {} errors, {} warnings",
            result.missing.len(),
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Per-section required keys and warnings.
    fn validate_section(name: SectionName, config: &ConfigStore, result: &mut ValidationResult) {
        let required: &[&str] = match name {
            SectionName::Bq => &[keys::BIGQUERY_DATASET_ID],
            SectionName::Sql => &[keys::CLOUD_SQL_INSTANCE_NAME, keys::CLOUD_SQL_DB_NAME],
            SectionName::Gcs => &[keys::GCS_BUCKET_NAME],
            _ => &[],
        };
        for key in required {
            if !config.contains(key) {
                result.missing.push((*key).to_string());
            }
        }

        match name {
            SectionName::Backend if !config.contains(keys::BACKEND_IMAGE_NAME) => {
                result.warnings.push(format!(
                    "{} is not set; the backend service will not be managed",
                    keys::BACKEND_IMAGE_NAME
                ));
            }
            SectionName::Etl
                if !config.contains(keys::ETL_IMAGE_NAME)
                    && !config.contains(keys::BACKEND_IMAGE_NAME) =>
            {
                result.warnings.push(format!(
                    "Neither {} nor {} is set; the ETL job will not be managed",
                    keys::ETL_IMAGE_NAME,
                    keys::BACKEND_IMAGE_NAME
                ));
            }
            SectionName::Secrets => {
                let prefix = keys::string(config, keys::SECRET_PREFIX);
                for (key, _) in config.namespace(Namespace::Secrets) {
                    let secret_id = format!("{prefix}{key}");
                    if !is_valid_secret_id(&secret_id) {
                        result.errors.push(ValidationError {
                            field: key.to_string(),
                            message: format!(
                                "Secret id '{secret_id}' must be 1-255 letters, digits, '-' or '_'"
                            ),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    fn validate_secret_values(config: &ConfigStore, result: &mut ValidationResult) {
        for (key, value) in config.namespace(Namespace::Secrets) {
            let len = value.value.trim().chars().count();
            if (1..MIN_SECRET_LEN).contains(&len) {
                result.errors.push(ValidationError {
                    field: key.to_string(),
                    message: format!("Secret value must be at least {MIN_SECRET_LEN} characters"),
                });
            }
        }
    }

    fn validate_names(config: &ConfigStore, result: &mut ValidationResult) {
        if let Some(project) = config.get_opt(keys::GCP_PROJECT_ID) {
            if !is_valid_project_id(project) {
                result.errors.push(ValidationError {
                    field: keys::GCP_PROJECT_ID.to_string(),
                    message: format!(
                        "Project id '{project}' must be 6-30 lowercase letters, digits or hyphens, starting with a letter"
                    ),
                });
            }
        }

        if let Some(email) = config.get_opt(keys::DEPLOY_SERVICE_ACCOUNT_EMAIL) {
            if !email.contains('@') {
                result.errors.push(ValidationError {
                    field: keys::DEPLOY_SERVICE_ACCOUNT_EMAIL.to_string(),
                    message: format!("'{email}' is not a service account email"),
                });
            }
        }

        for key in [
            keys::ARTIFACT_REGISTRY_REPO,
            keys::BACKEND_SERVICE_NAME,
            keys::ETL_JOB_NAME,
            keys::FRONTEND_SERVICE_NAME,
        ] {
            let value = keys::string(config, key);
            if !value.is_empty() && !is_valid_name(&value) {
                result.errors.push(ValidationError {
                    field: key.to_string(),
                    message: format!(
                        "'{value}' is invalid. Must be lowercase alphanumeric with hyphens, starting with a letter."
                    ),
                });
            }
        }

        if let Some(bucket) = config.get_opt(keys::GCS_BUCKET_NAME) {
            if !is_valid_bucket_name(bucket) {
                result.errors.push(ValidationError {
                    field: keys::GCS_BUCKET_NAME.to_string(),
                    message: format!(
                        "Bucket name '{bucket}' must be 3-63 lowercase letters, digits, '-', '_' or '.', starting and ending with a letter or digit"
                    ),
                });
            }
        }

        if let Some(dataset) = config.get_opt(keys::BIGQUERY_DATASET_ID) {
            if !is_valid_dataset_id(dataset) {
                result.errors.push(ValidationError {
                    field: keys::BIGQUERY_DATASET_ID.to_string(),
                    message: format!("Dataset id '{dataset}' may only contain letters, digits and '_'"),
                });
            }
        }
    }

    fn validate_unknown_keys(config: &ConfigStore, result: &mut ValidationResult) {
        for (key, value) in config.namespace(Namespace::Infra) {
            if !keys::is_known(key) {
                result.warnings.push(format!(
                    "Unknown key {key} in {} is ignored",
                    value.origin
                ));
            }
        }
        for (key, value) in config.iter() {
            if value.namespace == Namespace::Services
                && keys::spec(key).is_some_and(|spec| spec.namespace == Namespace::Infra)
            {
                result.warnings.push(format!(
                    "{key} belongs in .env.infra; the value from {} is used",
                    value.origin
                ));
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no missing keys, no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    /// Returns the number of errors, counting missing keys.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.missing.len() + self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Converts the result into an error if validation failed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` when keys are missing,
    /// otherwise `ConfigError::Invalid` for the first error.
    pub fn into_result(self) -> ConfigResult<Self> {
        if !self.missing.is_empty() {
            return Err(ConfigError::MissingRequired {
                keys: self.missing,
            });
        }
        match self.errors.first() {
            Some(first) => Err(ConfigError::invalid(&first.field, &first.message)),
            None => Ok(self),
        }
    }

    fn push_error(&mut self, err: &ConfigError) {
        let field = match err {
            ConfigError::Type { key, .. } | ConfigError::Invalid { key, .. } => key.clone(),
            _ => String::from("config"),
        };
        self.errors.push(ValidationError {
            field,
            message: err.to_string(),
        });
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates that a name follows the Cloud Run naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--") && name.len() <= 63
}

fn is_valid_project_id(id: &str) -> bool {
    (6..=30).contains(&id.len())
        && id.starts_with(|c: char| c.is_ascii_lowercase())
        && !id.ends_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_valid_bucket_name(name: &str) -> bool {
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    (3..=63).contains(&name.len())
        && edge_ok(name.chars().next())
        && edge_ok(name.chars().last())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

fn is_valid_dataset_id(id: &str) -> bool {
    id.len() <= 1024 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_secret_id(id: &str) -> bool {
    (1..=255).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
