//! Configuration key catalog.
//!
//! Names and defaults of every key the orchestrator reads, plus the
//! run-level settings derived from them.

use std::fmt;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

use super::store::{ConfigStore, Namespace};

/// Google Cloud project id.
pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
/// Region for Cloud Run, Artifact Registry and buckets.
pub const GCP_REGION: &str = "GCP_REGION";
/// Service account used by deployed services.
pub const DEPLOY_SERVICE_ACCOUNT_EMAIL: &str = "DEPLOY_SERVICE_ACCOUNT_EMAIL";
/// Artifact Registry docker repository.
pub const ARTIFACT_REGISTRY_REPO: &str = "ARTIFACT_REGISTRY_REPO";

/// Toggle for the backend service.
pub const DEPLOY_BACKEND: &str = "DEPLOY_BACKEND";
/// Toggle for the frontend build.
pub const DEPLOY_FRONTEND: &str = "DEPLOY_FRONTEND";
/// Toggle for the ETL job.
pub const DEPLOY_ETL_JOB: &str = "DEPLOY_ETL_JOB";
/// Toggle for serving the frontend from Cloud Run.
pub const DEPLOY_FRONTEND_CLOUD_RUN: &str = "DEPLOY_FRONTEND_CLOUD_RUN";
/// Toggle for the BigQuery dataset.
pub const ENABLE_BIGQUERY: &str = "ENABLE_BIGQUERY";
/// Toggle for the Cloud SQL database.
pub const ENABLE_CLOUD_SQL: &str = "ENABLE_CLOUD_SQL";
/// Toggle for the GCS bucket.
pub const ENABLE_GCS: &str = "ENABLE_GCS";
/// Toggle for Firebase Hosting.
pub const ENABLE_FIREBASE: &str = "ENABLE_FIREBASE";
/// Toggle for Secret Manager usage.
pub const ENABLE_SECRET_MANAGER: &str = "ENABLE_SECRET_MANAGER";
/// Toggle for uploading `.env.secrets`.
pub const CONFIGURE_SECRETS: &str = "CONFIGURE_SECRETS";

/// BigQuery project, defaults to the GCP project.
pub const BIGQUERY_PROJECT_ID: &str = "BIGQUERY_PROJECT_ID";
/// BigQuery dataset id.
pub const BIGQUERY_DATASET_ID: &str = "BIGQUERY_DATASET_ID";
/// BigQuery dataset location.
pub const BIGQUERY_LOCATION: &str = "BIGQUERY_LOCATION";
/// Existing Cloud SQL instance.
pub const CLOUD_SQL_INSTANCE_NAME: &str = "CLOUD_SQL_INSTANCE_NAME";
/// Database inside the Cloud SQL instance.
pub const CLOUD_SQL_DB_NAME: &str = "CLOUD_SQL_DB_NAME";
/// Database user.
pub const CLOUD_SQL_USER: &str = "CLOUD_SQL_USER";
/// GCS bucket name.
pub const GCS_BUCKET_NAME: &str = "GCS_BUCKET_NAME";
/// Object prefix inside the bucket.
pub const GCS_PREFIX: &str = "GCS_PREFIX";
/// Firebase project, defaults to the GCP project.
pub const FIREBASE_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
/// Firebase Hosting site.
pub const FIREBASE_HOSTING_SITE: &str = "FIREBASE_HOSTING_SITE";
/// Prefix prepended to every uploaded secret name.
pub const SECRET_PREFIX: &str = "SECRET_PREFIX";

/// How images are built: `cloud_build` or `local_docker`.
pub const BUILD_MODE: &str = "BUILD_MODE";
/// Timeout for a single inspection.
pub const INSPECT_TIMEOUT: &str = "INSPECT_TIMEOUT";
/// Timeout for image and frontend builds.
pub const BUILD_TIMEOUT: &str = "BUILD_TIMEOUT";
/// Timeout for deploy calls.
pub const DEPLOY_TIMEOUT: &str = "DEPLOY_TIMEOUT";
/// Timeout for a whole reconcile step.
pub const ACTION_TIMEOUT: &str = "ACTION_TIMEOUT";
/// Retries for retryable inspection errors.
pub const INSPECT_RETRIES: &str = "INSPECT_RETRIES";
/// Retries for retryable reconcile errors.
pub const RECONCILE_RETRIES: &str = "RECONCILE_RETRIES";
/// Maximum inspections in flight.
pub const INSPECT_CONCURRENCY: &str = "INSPECT_CONCURRENCY";
/// Halt the run after the first failed action.
pub const STOP_ON_FIRST_FAILURE: &str = "STOP_ON_FIRST_FAILURE";
/// Show a spinner on stderr while a tool is silent.
pub const CLI_SHOW_PROGRESS: &str = "CLI_SHOW_PROGRESS";
/// Silence before the spinner appears.
pub const CLI_PROGRESS_IDLE_SECONDS: &str = "CLI_PROGRESS_IDLE_SECONDS";
/// Spinner frames: `braille` or `ascii`.
pub const CLI_PROGRESS_STYLE: &str = "CLI_PROGRESS_STYLE";
/// Time between spinner frames.
pub const CLI_PROGRESS_INTERVAL_SECONDS: &str = "CLI_PROGRESS_INTERVAL_SECONDS";

/// Cloud Run service name of the backend.
pub const BACKEND_SERVICE_NAME: &str = "BACKEND_SERVICE_NAME";
/// Image name of the backend; the backend is unmanaged without it.
pub const BACKEND_IMAGE_NAME: &str = "BACKEND_IMAGE_NAME";
/// Tag applied to every built image.
pub const IMAGE_TAG: &str = "IMAGE_TAG";
/// Docker build context of the backend.
pub const BACKEND_SOURCE_DIR: &str = "BACKEND_SOURCE_DIR";
/// Secret keys mounted into the backend as env vars.
pub const BACKEND_SECRETS: &str = "BACKEND_SECRETS";
/// Health endpoint path probed after deploy.
pub const BACKEND_HEALTH_PATH: &str = "BACKEND_HEALTH_PATH";
/// Externally managed backend URL; waives the frontend's backend dependency.
pub const BACKEND_API_HOST: &str = "BACKEND_API_HOST";
/// Cloud Run job name of the ETL.
pub const ETL_JOB_NAME: &str = "ETL_JOB_NAME";
/// Image name of the ETL job, defaults to the backend image.
pub const ETL_IMAGE_NAME: &str = "ETL_IMAGE_NAME";
/// Frontend project directory.
pub const FRONTEND_SOURCE_DIR: &str = "FRONTEND_SOURCE_DIR";
/// Command building the frontend.
pub const FRONTEND_BUILD_COMMAND: &str = "FRONTEND_BUILD_COMMAND";
/// Build output directory, relative to the frontend directory.
pub const FRONTEND_BUILD_DIR: &str = "FRONTEND_BUILD_DIR";
/// Env var receiving the backend URL during the frontend build.
pub const FRONTEND_API_URL_VAR: &str = "FRONTEND_API_URL_VAR";
/// Cloud Run service name of the frontend.
pub const FRONTEND_SERVICE_NAME: &str = "FRONTEND_SERVICE_NAME";
/// Image name of the Cloud Run frontend.
pub const FRONTEND_IMAGE_NAME: &str = "FRONTEND_IMAGE_NAME";

/// A catalogued key.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    /// Key name.
    pub name: &'static str,
    /// File the key is expected in.
    pub namespace: Namespace,
    /// Default value, empty when the key has none.
    pub default: &'static str,
}

const fn infra(name: &'static str, default: &'static str) -> KeySpec {
    KeySpec {
        name,
        namespace: Namespace::Infra,
        default,
    }
}

const fn services(name: &'static str, default: &'static str) -> KeySpec {
    KeySpec {
        name,
        namespace: Namespace::Services,
        default,
    }
}

/// Every key the orchestrator reads.
pub const CATALOG: &[KeySpec] = &[
    infra(GCP_PROJECT_ID, ""),
    infra(GCP_REGION, ""),
    infra(DEPLOY_SERVICE_ACCOUNT_EMAIL, ""),
    infra(ARTIFACT_REGISTRY_REPO, ""),
    infra(DEPLOY_BACKEND, "true"),
    infra(DEPLOY_FRONTEND, "true"),
    infra(DEPLOY_ETL_JOB, "false"),
    infra(DEPLOY_FRONTEND_CLOUD_RUN, "false"),
    infra(ENABLE_BIGQUERY, "false"),
    infra(ENABLE_CLOUD_SQL, "false"),
    infra(ENABLE_GCS, "false"),
    infra(ENABLE_FIREBASE, "false"),
    infra(ENABLE_SECRET_MANAGER, "true"),
    infra(CONFIGURE_SECRETS, "true"),
    infra(BIGQUERY_PROJECT_ID, ""),
    infra(BIGQUERY_DATASET_ID, ""),
    infra(BIGQUERY_LOCATION, "US"),
    infra(CLOUD_SQL_INSTANCE_NAME, ""),
    infra(CLOUD_SQL_DB_NAME, ""),
    infra(CLOUD_SQL_USER, ""),
    infra(GCS_BUCKET_NAME, ""),
    infra(GCS_PREFIX, ""),
    infra(FIREBASE_PROJECT_ID, ""),
    infra(FIREBASE_HOSTING_SITE, ""),
    infra(SECRET_PREFIX, ""),
    infra(BUILD_MODE, "cloud_build"),
    infra(INSPECT_TIMEOUT, "60s"),
    infra(BUILD_TIMEOUT, "20m"),
    infra(DEPLOY_TIMEOUT, "15m"),
    infra(ACTION_TIMEOUT, "45m"),
    infra(INSPECT_RETRIES, "2"),
    infra(RECONCILE_RETRIES, "0"),
    infra(INSPECT_CONCURRENCY, "4"),
    infra(STOP_ON_FIRST_FAILURE, "false"),
    infra(CLI_SHOW_PROGRESS, "true"),
    infra(CLI_PROGRESS_IDLE_SECONDS, "2"),
    infra(CLI_PROGRESS_STYLE, "braille"),
    infra(CLI_PROGRESS_INTERVAL_SECONDS, "0.12"),
    services(BACKEND_SERVICE_NAME, "backend"),
    services(BACKEND_IMAGE_NAME, ""),
    services(IMAGE_TAG, "latest"),
    services(BACKEND_SOURCE_DIR, "."),
    services(BACKEND_SECRETS, ""),
    services(BACKEND_HEALTH_PATH, ""),
    services(BACKEND_API_HOST, ""),
    services(ETL_JOB_NAME, "etl-job"),
    services(ETL_IMAGE_NAME, ""),
    services(FRONTEND_SOURCE_DIR, "frontend"),
    services(FRONTEND_BUILD_COMMAND, "npm run build"),
    services(FRONTEND_BUILD_DIR, "dist"),
    services(FRONTEND_API_URL_VAR, "VITE_API_BASE_URL"),
    services(FRONTEND_SERVICE_NAME, "frontend"),
    services(FRONTEND_IMAGE_NAME, "frontend"),
];

/// Keys that must be set for any run.
pub const REQUIRED_BASE: &[&str] = &[
    GCP_PROJECT_ID,
    GCP_REGION,
    DEPLOY_SERVICE_ACCOUNT_EMAIL,
    ARTIFACT_REGISTRY_REPO,
];

/// Returns true if the key is part of the catalog.
#[must_use]
pub fn is_known(key: &str) -> bool {
    CATALOG.iter().any(|spec| spec.name == key)
}

/// Looks up a catalogued key.
#[must_use]
pub fn spec(key: &str) -> Option<&'static KeySpec> {
    CATALOG.iter().find(|spec| spec.name == key)
}

/// Value of a key, falling back to its catalog default.
#[must_use]
pub fn string(config: &ConfigStore, key: &str) -> String {
    config.get_string(key, spec(key).map_or("", |spec| spec.default))
}

/// Boolean value of a key with its catalog default.
///
/// # Errors
///
/// Returns `ConfigError::Type` for a malformed value.
pub fn flag(config: &ConfigStore, key: &str) -> ConfigResult<bool> {
    let default = spec(key).is_some_and(|spec| spec.default == "true");
    config.get_bool(key, default)
}

/// How container images are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// `gcloud builds submit --tag`.
    #[default]
    CloudBuild,
    /// `docker build` followed by `docker push`.
    LocalDocker,
}

impl BuildMode {
    /// Parses the `BUILD_MODE` value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unknown mode.
    pub fn from_config(config: &ConfigStore) -> ConfigResult<Self> {
        match string(config, BUILD_MODE).to_ascii_lowercase().as_str() {
            "cloud_build" | "cloudbuild" => Ok(Self::CloudBuild),
            "local_docker" | "docker" => Ok(Self::LocalDocker),
            other => Err(ConfigError::invalid(
                BUILD_MODE,
                format!("unknown build mode '{other}' (expected cloud_build or local_docker)"),
            )),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloudBuild => write!(f, "cloud_build"),
            Self::LocalDocker => write!(f, "local_docker"),
        }
    }
}

/// Spinner frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinnerStyle {
    /// Braille dots.
    #[default]
    Braille,
    /// `| / - \`.
    Ascii,
}

impl SpinnerStyle {
    /// Parses the `CLI_PROGRESS_STYLE` value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unknown style.
    pub fn from_config(config: &ConfigStore) -> ConfigResult<Self> {
        match string(config, CLI_PROGRESS_STYLE).to_ascii_lowercase().as_str() {
            "braille" => Ok(Self::Braille),
            "ascii" => Ok(Self::Ascii),
            other => Err(ConfigError::invalid(
                CLI_PROGRESS_STYLE,
                format!("unknown progress style '{other}' (expected braille or ascii)"),
            )),
        }
    }
}

/// When and how the idle spinner is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSettings {
    /// Draw the spinner at all. Only terminals ever see it.
    pub enabled: bool,
    /// Silence before the spinner appears.
    pub idle: Duration,
    /// Frame set.
    pub style: SpinnerStyle,
    /// Time between frames, at least 20ms.
    pub interval: Duration,
}

impl ProgressSettings {
    /// Shortest frame interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(20);

    /// Settings that never draw.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            idle: Duration::from_secs(2),
            style: SpinnerStyle::Braille,
            interval: Duration::from_millis(120),
        }
    }

    /// Reads the `CLI_*PROGRESS*` keys.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for any malformed value.
    pub fn from_config(config: &ConfigStore) -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: flag(config, CLI_SHOW_PROGRESS)?,
            idle: config.get_duration(CLI_PROGRESS_IDLE_SECONDS, defaults.idle)?,
            style: SpinnerStyle::from_config(config)?,
            interval: config
                .get_duration(CLI_PROGRESS_INTERVAL_SECONDS, defaults.interval)?
                .max(Self::MIN_INTERVAL),
        })
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }
}

/// Run-level timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Timeout for one inspection attempt.
    pub inspect_timeout: Duration,
    /// Timeout for image and frontend builds.
    pub build_timeout: Duration,
    /// Timeout for deploy calls.
    pub deploy_timeout: Duration,
    /// Timeout for a whole reconcile step.
    pub action_timeout: Duration,
    /// Retries for retryable inspection errors.
    pub inspect_retries: usize,
    /// Retries for retryable reconcile errors.
    pub reconcile_retries: usize,
    /// Maximum inspections in flight, at least one.
    pub inspect_concurrency: usize,
    /// Halt after the first failed action.
    pub stop_on_first_failure: bool,
    /// Image build mode.
    pub build_mode: BuildMode,
    /// Idle spinner for long tool calls.
    pub progress: ProgressSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            inspect_timeout: Duration::from_secs(60),
            build_timeout: Duration::from_secs(20 * 60),
            deploy_timeout: Duration::from_secs(15 * 60),
            action_timeout: Duration::from_secs(45 * 60),
            inspect_retries: 2,
            reconcile_retries: 0,
            inspect_concurrency: 4,
            stop_on_first_failure: false,
            build_mode: BuildMode::CloudBuild,
            progress: ProgressSettings::default(),
        }
    }
}

impl RuntimeSettings {
    /// Reads the settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for any malformed value.
    pub fn from_config(config: &ConfigStore) -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            inspect_timeout: config.get_duration(INSPECT_TIMEOUT, defaults.inspect_timeout)?,
            build_timeout: config.get_duration(BUILD_TIMEOUT, defaults.build_timeout)?,
            deploy_timeout: config.get_duration(DEPLOY_TIMEOUT, defaults.deploy_timeout)?,
            action_timeout: config.get_duration(ACTION_TIMEOUT, defaults.action_timeout)?,
            inspect_retries: config.get_count(INSPECT_RETRIES, defaults.inspect_retries)?,
            reconcile_retries: config.get_count(RECONCILE_RETRIES, defaults.reconcile_retries)?,
            inspect_concurrency: config
                .get_count(INSPECT_CONCURRENCY, defaults.inspect_concurrency)?
                .max(1),
            stop_on_first_failure: config
                .get_bool(STOP_ON_FIRST_FAILURE, defaults.stop_on_first_failure)?,
            build_mode: BuildMode::from_config(config)?,
            progress: ProgressSettings::from_config(config)?,
        })
    }
}
