//! Cloud Storage bucket.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ConfigStore, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::gcloud::{Gcloud, json_str, required_apis};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Creates the bucket in the deployment region if missing.
#[derive(Debug)]
pub struct StorageDriver {
    gcloud: Arc<Gcloud>,
}

impl StorageDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(gcloud: Arc<Gcloud>) -> Self {
        Self { gcloud }
    }
}

fn uri(bucket: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("gs://{bucket}")
    } else {
        format!("gs://{bucket}/{prefix}")
    }
}

#[async_trait]
impl ResourceDriver for StorageDriver {
    fn section(&self) -> SectionName {
        SectionName::Gcs
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let bucket = keys::string(config, keys::GCS_BUCKET_NAME);
        Ok(Desired::Managed(
            DesiredState::new(format!("gs://{bucket}"))
                .with_plain("location", keys::string(config, keys::GCP_REGION).to_ascii_lowercase())
                .with_param("bucket", bucket)
                .with_param("prefix", keys::string(config, keys::GCS_PREFIX)),
        ))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let bucket = desired
            .param("bucket")
            .ok_or_else(|| DriverError::precondition("bucket name missing"))?;
        let url = format!("gs://{bucket}");
        let Some(found) = self
            .gcloud
            .describe(["storage", "buckets", "describe", url.as_str()])
            .await?
        else {
            return Ok(ObservedState::Absent);
        };

        let mut attributes = Attributes::new();
        if let Some(location) = json_str(&found, "/location") {
            attributes.insert(
                String::from("location"),
                Attribute::plain(location.to_ascii_lowercase()),
            );
        }
        Ok(ObservedState::Present {
            attributes,
            outputs: Outputs::from([(
                String::from("uri"),
                uri(bucket, desired.param("prefix").unwrap_or_default()),
            )]),
        })
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let bucket = desired
            .param("bucket")
            .ok_or_else(|| DriverError::precondition("bucket name missing"))?;
        let location = desired.require("location")?;

        match self.inspect(desired).await? {
            ObservedState::Present { attributes, .. } => {
                let current = attributes.get("location").map(ToString::to_string).unwrap_or_default();
                if current != location {
                    return Err(DriverError::precondition(format!(
                        "bucket {bucket} is in {current}; buckets cannot move to {location}"
                    )));
                }
            }
            _ => {
                self.gcloud.enable_apis(required_apis(SectionName::Gcs)).await?;
                info!("Creating bucket gs://{bucket} in {location}");
                let url = format!("gs://{bucket}");
                let location_arg = format!("--location={location}");
                let spec = self.gcloud.command([
                    "storage",
                    "buckets",
                    "create",
                    url.as_str(),
                    location_arg.as_str(),
                    "--uniform-bucket-level-access",
                ]);
                self.gcloud.run(&spec).await?;
            }
        }

        Ok(Outputs::from([(
            String::from("uri"),
            uri(bucket, desired.param("prefix").unwrap_or_default()),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Namespace, RuntimeSettings};
    use crate::driver::command::{CommandOutput, MockCommandRunner};

    fn driver(runner: MockCommandRunner) -> StorageDriver {
        StorageDriver::new(Arc::new(Gcloud::new(
            Arc::new(runner),
            "acme-prod-1",
            "asia-northeast3",
            RuntimeSettings::default(),
        )))
    }

    fn desired() -> DesiredState {
        let config = ConfigStore::from_entries([
            (Namespace::Infra, keys::GCP_REGION, "asia-northeast3"),
            (Namespace::Infra, keys::GCS_BUCKET_NAME, "acme-raw-data"),
            (Namespace::Infra, keys::GCS_PREFIX, "/ingest/"),
        ]);
        match driver(MockCommandRunner::new()).desired_state(&config).unwrap() {
            Desired::Managed(state) => state,
            Desired::Unmanaged { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn test_uri() {
        assert_eq!(uri("b", ""), "gs://b");
        assert_eq!(uri("b", "/ingest/"), "gs://b/ingest");
    }

    #[tokio::test]
    async fn test_location_is_compared_case_insensitively() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["storage", "buckets", "describe", "gs://acme-raw-data"]))
            .returning(|_| Ok(CommandOutput::stdout(r#"{"location": "ASIA-NORTHEAST3"}"#)));

        let outputs = driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap();
        assert_eq!(outputs.get("uri").map(String::as_str), Some("gs://acme-raw-data/ingest"));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_created() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["storage", "buckets", "describe"]))
            .returning(|spec| {
                Err(DriverError::CommandFailed {
                    command: spec.to_string(),
                    status: 1,
                    stderr: String::from("ERROR: gs://acme-raw-data not found: 404."),
                })
            });
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["services", "enable"]))
            .returning(|_| Ok(CommandOutput::default()));
        runner
            .expect_run()
            .withf(|spec| {
                spec.starts_with(&["storage", "buckets", "create", "gs://acme-raw-data"])
                    && spec.has_arg("--location=asia-northeast3")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::default()));

        driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_region_is_refused() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::stdout(r#"{"location": "US"}"#)));
        let err = driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot move"));
    }
}
