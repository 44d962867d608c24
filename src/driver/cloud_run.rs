//! Cloud Run services (backend, Cloud Run frontend) and the ETL job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{ConfigStore, Namespace, keys, split_list};
use crate::error::{ConfigError, ConfigResult, DriverError};
use crate::sections::SectionName;

use super::artifact::{ImageBuilder, image_url};
use super::gcloud::{Gcloud, json_str, required_apis};
use super::health::{HealthChecker, join_url};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Health probes after a backend deploy.
const HEALTH_ATTEMPTS: u32 = 6;

/// Which Cloud Run service a driver manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceRole {
    Backend,
    Frontend,
}

/// Builds an image and deploys it as a Cloud Run service.
#[derive(Debug)]
pub struct CloudRunServiceDriver {
    gcloud: Arc<Gcloud>,
    root: PathBuf,
    role: ServiceRole,
}

impl CloudRunServiceDriver {
    /// Driver for the backend service.
    #[must_use]
    pub fn backend(gcloud: Arc<Gcloud>, root: &Path) -> Self {
        Self {
            gcloud,
            root: root.to_path_buf(),
            role: ServiceRole::Backend,
        }
    }

    /// Driver for the frontend served from Cloud Run.
    #[must_use]
    pub fn frontend(gcloud: Arc<Gcloud>, root: &Path) -> Self {
        Self {
            gcloud,
            root: root.to_path_buf(),
            role: ServiceRole::Frontend,
        }
    }

    fn service_name(desired: &DesiredState) -> Result<&str, DriverError> {
        desired
            .param("name")
            .ok_or_else(|| DriverError::precondition("service name missing"))
    }
}

#[async_trait]
impl ResourceDriver for CloudRunServiceDriver {
    fn section(&self) -> SectionName {
        match self.role {
            ServiceRole::Backend => SectionName::Backend,
            ServiceRole::Frontend => SectionName::FrontendCloudRun,
        }
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let (name_key, image_key, source_key) = match self.role {
            ServiceRole::Backend => (
                keys::BACKEND_SERVICE_NAME,
                keys::BACKEND_IMAGE_NAME,
                keys::BACKEND_SOURCE_DIR,
            ),
            ServiceRole::Frontend => (
                keys::FRONTEND_SERVICE_NAME,
                keys::FRONTEND_IMAGE_NAME,
                keys::FRONTEND_SOURCE_DIR,
            ),
        };

        let image_name = keys::string(config, image_key);
        if image_name.is_empty() {
            return Ok(Desired::Unmanaged {
                reason: format!("{image_key} is not set"),
            });
        }

        let name = keys::string(config, name_key);
        let mut desired = DesiredState::new(format!(
            "run/services/{name} ({})",
            keys::string(config, keys::GCP_REGION)
        ))
        .with_plain("image", image_for(config, &image_name))
        .with_plain(
            "service_account",
            keys::string(config, keys::DEPLOY_SERVICE_ACCOUNT_EMAIL),
        )
        .with_param("name", name)
        .with_param("repo", keys::string(config, keys::ARTIFACT_REGISTRY_REPO))
        .with_param(
            "source_dir",
            self.root.join(keys::string(config, source_key)).display().to_string(),
        );

        match self.role {
            ServiceRole::Backend => {
                if let Some(mappings) = secret_mappings(config)? {
                    desired = desired.with_plain("secrets", mappings);
                }
                if let Some(path) = config.get_opt(keys::BACKEND_HEALTH_PATH) {
                    desired = desired.with_param("health_path", path);
                }
            }
            ServiceRole::Frontend => {
                let var = keys::string(config, keys::FRONTEND_API_URL_VAR);
                desired = desired.with(format!("env.{var}"), api_url(config));
            }
        }

        Ok(Desired::Managed(desired))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let name = Self::service_name(desired)?;
        let region = format!("--region={}", self.gcloud.region());
        let Some(service) = self
            .gcloud
            .describe(["run", "services", "describe", name, region.as_str()])
            .await?
        else {
            return Ok(ObservedState::Absent);
        };

        let attributes = container_attributes(&service, "/spec/template/spec");
        let mut outputs = Outputs::new();
        if let Some(url) = json_str(&service, "/status/url") {
            outputs.insert(String::from("url"), url.to_string());
        }
        if let Some(image) = attributes.get("image") {
            outputs.insert(String::from("image"), image.to_string());
        }
        Ok(ObservedState::Present { attributes, outputs })
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let name = Self::service_name(desired)?;
        let image = desired.require("image")?;
        let repo = desired.param("repo").unwrap_or_default();
        let source_dir = desired.param("source_dir").unwrap_or(".");

        self.gcloud.enable_apis(required_apis(self.section())).await?;
        let builder = ImageBuilder::new(&self.gcloud, repo);
        builder.ensure_repository().await?;
        builder
            .build_and_push(image, Path::new(source_dir), self.gcloud.settings().build_mode)
            .await?;

        info!("Deploying Cloud Run service {name}");
        let mut args = vec![
            String::from("run"),
            String::from("deploy"),
            name.to_string(),
            format!("--image={image}"),
            format!("--region={}", self.gcloud.region()),
            format!("--service-account={}", desired.require("service_account")?),
        ];
        if let Some(mappings) = desired.value("secrets") {
            args.push(format!("--set-secrets={mappings}"));
        }
        let env_vars: Vec<String> = desired
            .attributes
            .iter()
            .filter_map(|(key, value)| match (key.strip_prefix("env."), value) {
                (Some(var), Attribute::Plain(value)) => Some(format!("{var}={value}")),
                _ => None,
            })
            .collect();
        if !env_vars.is_empty() {
            args.push(format!("--update-env-vars={}", env_vars.join(",")));
        }
        self.gcloud.run(&self.gcloud.command(args)).await?;

        let region = format!("--region={}", self.gcloud.region());
        let service = self
            .gcloud
            .describe(["run", "services", "describe", name, region.as_str()])
            .await?
            .ok_or_else(|| DriverError::invalid_response(format!("{name} not found after deploy")))?;
        let url = json_str(&service, "/status/url")
            .ok_or_else(|| DriverError::invalid_response(format!("{name} has no URL")))?
            .to_string();

        if let Some(path) = desired.param("health_path") {
            let status = HealthChecker::new()?
                .wait_for_healthy(&join_url(&url, path), HEALTH_ATTEMPTS)
                .await?;
            info!("{status}");
        }

        Ok(Outputs::from([
            (String::from("url"), url),
            (String::from("image"), image.to_string()),
        ]))
    }
}

/// Builds an image and deploys it as a Cloud Run job.
#[derive(Debug)]
pub struct CloudRunJobDriver {
    gcloud: Arc<Gcloud>,
    root: PathBuf,
}

impl CloudRunJobDriver {
    /// Creates the ETL job driver.
    #[must_use]
    pub fn new(gcloud: Arc<Gcloud>, root: &Path) -> Self {
        Self {
            gcloud,
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl ResourceDriver for CloudRunJobDriver {
    fn section(&self) -> SectionName {
        SectionName::Etl
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let Some(image_name) = config
            .get_opt(keys::ETL_IMAGE_NAME)
            .or_else(|| config.get_opt(keys::BACKEND_IMAGE_NAME))
        else {
            return Ok(Desired::Unmanaged {
                reason: format!(
                    "neither {} nor {} is set",
                    keys::ETL_IMAGE_NAME,
                    keys::BACKEND_IMAGE_NAME
                ),
            });
        };

        let name = keys::string(config, keys::ETL_JOB_NAME);
        let mut desired = DesiredState::new(format!(
            "run/jobs/{name} ({})",
            keys::string(config, keys::GCP_REGION)
        ))
        .with_plain("image", image_for(config, image_name))
        .with_plain(
            "service_account",
            keys::string(config, keys::DEPLOY_SERVICE_ACCOUNT_EMAIL),
        )
        .with_param("name", name)
        .with_param("repo", keys::string(config, keys::ARTIFACT_REGISTRY_REPO))
        .with_param(
            "source_dir",
            self.root
                .join(keys::string(config, keys::BACKEND_SOURCE_DIR))
                .display()
                .to_string(),
        );
        if let Some(mappings) = secret_mappings(config)? {
            desired = desired.with_plain("secrets", mappings);
        }
        Ok(Desired::Managed(desired))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let name = desired
            .param("name")
            .ok_or_else(|| DriverError::precondition("job name missing"))?;
        let region = format!("--region={}", self.gcloud.region());
        let job = self
            .gcloud
            .describe(["run", "jobs", "describe", name, region.as_str()])
            .await?;
        Ok(job.map_or(ObservedState::Absent, |job| {
            ObservedState::present(container_attributes(
                &job,
                "/spec/template/spec/template/spec",
            ))
        }))
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let name = desired
            .param("name")
            .ok_or_else(|| DriverError::precondition("job name missing"))?;
        let image = desired.require("image")?;

        self.gcloud.enable_apis(required_apis(SectionName::Etl)).await?;
        if context.get("backend.image") == Some(image) {
            info!("{image} was already built for the backend in this run");
        } else {
            let builder = ImageBuilder::new(&self.gcloud, desired.param("repo").unwrap_or_default());
            builder.ensure_repository().await?;
            builder
                .build_and_push(
                    image,
                    Path::new(desired.param("source_dir").unwrap_or(".")),
                    self.gcloud.settings().build_mode,
                )
                .await?;
        }

        info!("Deploying Cloud Run job {name}");
        let mut args = vec![
            String::from("run"),
            String::from("jobs"),
            String::from("deploy"),
            name.to_string(),
            format!("--image={image}"),
            format!("--region={}", self.gcloud.region()),
            format!("--service-account={}", desired.require("service_account")?),
        ];
        if let Some(mappings) = desired.value("secrets") {
            args.push(format!("--set-secrets={mappings}"));
        }
        self.gcloud.run(&self.gcloud.command(args)).await?;

        Ok(Outputs::from([
            (String::from("name"), name.to_string()),
            (String::from("image"), image.to_string()),
        ]))
    }
}

fn image_for(config: &ConfigStore, image_name: &str) -> String {
    image_url(
        &keys::string(config, keys::GCP_REGION),
        &keys::string(config, keys::GCP_PROJECT_ID),
        &keys::string(config, keys::ARTIFACT_REGISTRY_REPO),
        image_name,
        &keys::string(config, keys::IMAGE_TAG),
    )
}

/// Where the frontend finds the backend: an external host or the URL the
/// backend section produces.
pub(super) fn api_url(config: &ConfigStore) -> Attribute {
    config.get_opt(keys::BACKEND_API_HOST).map_or_else(
        || Attribute::Output(String::from("backend.url")),
        Attribute::plain,
    )
}

/// `ENV=secret:latest` pairs for the keys listed in `BACKEND_SECRETS`,
/// sorted by env name.
fn secret_mappings(config: &ConfigStore) -> ConfigResult<Option<String>> {
    let listed = split_list(&keys::string(config, keys::BACKEND_SECRETS));
    if listed.is_empty() {
        return Ok(None);
    }
    let prefix = keys::string(config, keys::SECRET_PREFIX);
    let mut pairs = Vec::with_capacity(listed.len());
    for key in listed {
        if config.get(&key).is_none_or(|value| value.namespace != Namespace::Secrets) {
            return Err(ConfigError::invalid(
                keys::BACKEND_SECRETS,
                format!("{key} is not defined in .env.secrets"),
            ));
        }
        pairs.push(format!("{key}={prefix}{key}:latest"));
    }
    pairs.sort();
    Ok(Some(pairs.join(",")))
}

/// Image, service account, secret mappings and env vars of the first
/// container under `spec_pointer`.
fn container_attributes(resource: &Value, spec_pointer: &str) -> Attributes {
    let mut attributes = Attributes::new();
    let container = format!("{spec_pointer}/containers/0");

    if let Some(image) = json_str(resource, &format!("{container}/image")) {
        attributes.insert(String::from("image"), Attribute::plain(image));
    }
    if let Some(account) = json_str(resource, &format!("{spec_pointer}/serviceAccountName")) {
        attributes.insert(String::from("service_account"), Attribute::plain(account));
    }

    let mut secrets = Vec::new();
    let env = resource
        .pointer(&format!("{container}/env"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for var in env {
        let Some(name) = json_str(var, "/name") else {
            continue;
        };
        if let Some(secret) = json_str(var, "/valueFrom/secretKeyRef/name") {
            let version = json_str(var, "/valueFrom/secretKeyRef/key").unwrap_or("latest");
            secrets.push(format!("{name}={secret}:{version}"));
        } else if let Some(value) = json_str(var, "/value") {
            attributes.insert(format!("env.{name}"), Attribute::plain(value));
        }
    }
    if !secrets.is_empty() {
        secrets.sort();
        attributes.insert(String::from("secrets"), Attribute::Plain(secrets.join(",")));
    }
    attributes
}
