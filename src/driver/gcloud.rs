//! Thin wrapper around the `gcloud` CLI.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::RuntimeSettings;
use crate::error::DriverError;
use crate::sections::SectionName;

use super::command::{CommandOutput, CommandRunner, CommandSpec};

/// APIs every deployment needs.
const BASE_APIS: &[&str] = &[
    "run.googleapis.com",
    "artifactregistry.googleapis.com",
    "secretmanager.googleapis.com",
];

/// Stderr fragments (lowercase) meaning the described resource does not exist.
const NOT_FOUND_MARKERS: &[&str] = &["not_found", "not found", "does not exist", "404"];

/// Google APIs a section needs enabled.
#[must_use]
pub const fn required_apis(section: SectionName) -> &'static [&'static str] {
    match section {
        SectionName::Backend
        | SectionName::Etl
        | SectionName::Secrets
        | SectionName::FrontendCloudRun => BASE_APIS,
        SectionName::Bq => &["bigquery.googleapis.com"],
        SectionName::Sql => &["sqladmin.googleapis.com"],
        SectionName::Gcs => &["storage.googleapis.com"],
        SectionName::Firebase => &["firebase.googleapis.com", "firebaserules.googleapis.com"],
        SectionName::Frontend => &[],
    }
}

/// `gcloud` invocations bound to one project and region.
pub struct Gcloud {
    runner: Arc<dyn CommandRunner>,
    project: String,
    region: String,
    settings: RuntimeSettings,
}

impl std::fmt::Debug for Gcloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gcloud")
            .field("project", &self.project)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Gcloud {
    /// Creates a wrapper for a project and region.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        project: impl Into<String>,
        region: impl Into<String>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            runner,
            project: project.into(),
            region: region.into(),
            settings,
        }
    }

    /// Project id.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Run settings.
    #[must_use]
    pub const fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// The underlying command runner.
    #[must_use]
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// A `gcloud` command with project and non-interactive flags, using the
    /// deploy timeout.
    #[must_use]
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("gcloud")
            .args(args)
            .arg(format!("--project={}", self.project))
            .arg("--quiet")
            .timeout(self.settings.deploy_timeout)
    }

    /// Runs any command through the runner.
    ///
    /// # Errors
    ///
    /// Propagates the runner's error.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DriverError> {
        self.runner.run(spec).await
    }

    /// Describes a resource as JSON. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the command error for failures other than not-found, and
    /// `DriverError::InvalidResponse` for output that is not JSON.
    pub async fn describe<I, S>(&self, args: I) -> Result<Option<Value>, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self
            .command(args)
            .arg("--format=json")
            .timeout(self.settings.inspect_timeout);
        match self.runner.run(&spec).await {
            Ok(output) => parse_json(&output.stdout).map(Some),
            Err(err) if is_not_found(&err) => {
                debug!("{spec}: not found");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Enables APIs (idempotent).
    ///
    /// # Errors
    ///
    /// Returns the command error if enabling fails.
    pub async fn enable_apis(&self, apis: &[&str]) -> Result<(), DriverError> {
        if apis.is_empty() {
            return Ok(());
        }
        info!("Ensuring APIs are enabled: {}", apis.join(", "));
        let spec = self.command(["services", "enable"].into_iter().chain(apis.iter().copied()));
        self.runner.run(&spec).await.map(|_| ())
    }

    /// Names of the APIs enabled on the project.
    ///
    /// # Errors
    ///
    /// Returns the command error, or `InvalidResponse` for unexpected output.
    pub async fn enabled_apis(&self) -> Result<BTreeSet<String>, DriverError> {
        let spec = self
            .command(["services", "list", "--enabled", "--format=value(config.name)"])
            .timeout(self.settings.inspect_timeout);
        let output = self.runner.run(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Returns the active account, if gcloud is authenticated.
    ///
    /// # Errors
    ///
    /// Returns the command error.
    pub async fn active_account(&self) -> Result<Option<String>, DriverError> {
        let spec = CommandSpec::new("gcloud")
            .args(["auth", "list", "--filter=status:ACTIVE", "--format=value(account)"])
            .timeout(self.settings.inspect_timeout);
        let output = self.runner.run(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToString::to_string))
    }

    /// Timeout for builds.
    #[must_use]
    pub const fn build_timeout(&self) -> Duration {
        self.settings.build_timeout
    }
}

/// Returns true if a command failed because the resource does not exist.
#[must_use]
pub fn is_not_found(err: &DriverError) -> bool {
    match err {
        DriverError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_ascii_lowercase();
            NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker))
        }
        _ => false,
    }
}

/// Parses JSON command output.
///
/// # Errors
///
/// Returns `DriverError::InvalidResponse` if the output is not JSON.
pub fn parse_json(stdout: &str) -> Result<Value, DriverError> {
    serde_json::from_str(stdout)
        .map_err(|e| DriverError::invalid_response(format!("expected JSON output: {e}")))
}

/// Reads a string at a JSON pointer.
#[must_use]
pub fn json_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}
