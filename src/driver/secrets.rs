//! Secret Manager upload of `.env.secrets`.
//!
//! Remote values are read only to compute a digest; raw values travel to
//! `gcloud` over stdin and are never part of a command line.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{ConfigHasher, ConfigStore, Namespace, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::gcloud::{Gcloud, is_not_found, required_apis};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Creates secrets and adds a version whenever the local value changed.
#[derive(Debug)]
pub struct SecretsDriver {
    gcloud: Arc<Gcloud>,
    hasher: ConfigHasher,
}

impl SecretsDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(gcloud: Arc<Gcloud>) -> Self {
        Self {
            gcloud,
            hasher: ConfigHasher::new(),
        }
    }

    /// Digest of the latest version, or `None` if the secret or its
    /// versions do not exist.
    async fn latest_digest(&self, name: &str) -> Result<Option<String>, DriverError> {
        let secret_arg = format!("--secret={name}");
        let spec = self
            .gcloud
            .command(["secrets", "versions", "access", "latest", secret_arg.as_str()])
            .timeout(self.gcloud.settings().inspect_timeout);
        match self.gcloud.run(&spec).await {
            Ok(output) => Ok(Some(self.hasher.digest(&output.stdout))),
            Err(err) if is_not_found(&err) => {
                debug!("Secret {name} has no accessible version");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_secret(&self, name: &str) -> Result<(), DriverError> {
        if self
            .gcloud
            .describe(["secrets", "describe", name])
            .await?
            .is_some()
        {
            return Ok(());
        }
        info!("Creating secret {name}");
        let spec = self
            .gcloud
            .command(["secrets", "create", name, "--replication-policy=automatic"]);
        self.gcloud.run(&spec).await.map(|_| ())
    }
}

#[async_trait]
impl ResourceDriver for SecretsDriver {
    fn section(&self) -> SectionName {
        SectionName::Secrets
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let prefix = keys::string(config, keys::SECRET_PREFIX);
        let mut desired = DesiredState::new(format!(
            "secretmanager ({})",
            keys::string(config, keys::GCP_PROJECT_ID)
        ));
        for (key, value) in config.namespace(Namespace::Secrets) {
            if value.value.is_empty() {
                continue;
            }
            desired = desired.with(
                format!("{prefix}{key}"),
                Attribute::Secret(value.value.clone()),
            );
        }
        if desired.attributes.is_empty() {
            return Ok(Desired::Unmanaged {
                reason: String::from(".env.secrets defines no values"),
            });
        }
        Ok(Desired::Managed(desired))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let mut attributes = Attributes::new();
        for name in desired.attributes.keys() {
            if let Some(digest) = self.latest_digest(name).await? {
                attributes.insert(name.clone(), Attribute::Digest(digest));
            }
        }
        if attributes.is_empty() {
            return Ok(ObservedState::Absent);
        }
        Ok(ObservedState::present(attributes))
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        self.gcloud.enable_apis(required_apis(SectionName::Secrets)).await?;

        let mut updated = 0usize;
        for (name, attribute) in &desired.attributes {
            let Attribute::Secret(value) = attribute else {
                continue;
            };
            self.ensure_secret(name).await?;
            if self.latest_digest(name).await? == Some(self.hasher.digest(value)) {
                debug!("Secret {name} is up to date");
                continue;
            }

            info!("Adding a new version of {name}");
            let spec = self
                .gcloud
                .command(["secrets", "versions", "add", name.as_str(), "--data-file=-"])
                .stdin(value.clone());
            self.gcloud.run(&spec).await?;
            updated += 1;
        }

        Ok(Outputs::from([
            (String::from("count"), desired.attributes.len().to_string()),
            (String::from("updated"), updated.to_string()),
        ]))
    }
}
