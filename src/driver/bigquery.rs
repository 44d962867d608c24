//! BigQuery dataset.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ConfigStore, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::command::CommandSpec;
use super::gcloud::{Gcloud, is_not_found, json_str, parse_json, required_apis};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Creates the BigQuery dataset if missing. Datasets are never moved or
/// deleted.
#[derive(Debug)]
pub struct BigQueryDriver {
    gcloud: Arc<Gcloud>,
}

impl BigQueryDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(gcloud: Arc<Gcloud>) -> Self {
        Self { gcloud }
    }

    fn bq(&self, project: &str) -> CommandSpec {
        CommandSpec::new("bq")
            .arg(format!("--project_id={project}"))
            .timeout(self.gcloud.settings().inspect_timeout)
    }
}

#[async_trait]
impl ResourceDriver for BigQueryDriver {
    fn section(&self) -> SectionName {
        SectionName::Bq
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let project = config
            .get_opt(keys::BIGQUERY_PROJECT_ID)
            .map_or_else(|| keys::string(config, keys::GCP_PROJECT_ID), ToString::to_string);
        let dataset = keys::string(config, keys::BIGQUERY_DATASET_ID);
        Ok(Desired::Managed(
            DesiredState::new(format!("bigquery/{project}:{dataset}"))
                .with_plain("location", keys::string(config, keys::BIGQUERY_LOCATION))
                .with_param("project", project)
                .with_param("dataset", dataset),
        ))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let project = desired.param("project").unwrap_or_else(|| self.gcloud.project());
        let dataset = desired
            .param("dataset")
            .ok_or_else(|| DriverError::precondition("dataset id missing"))?;

        let spec = self.bq(project).args(["show", "--format=json", dataset]);
        let output = match self.gcloud.run(&spec).await {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => return Ok(ObservedState::Absent),
            Err(err) => return Err(err),
        };
        let value = parse_json(&output.stdout)?;

        let mut attributes = Attributes::new();
        if let Some(location) = json_str(&value, "/location") {
            attributes.insert(String::from("location"), Attribute::plain(location));
        }
        Ok(ObservedState::Present {
            attributes,
            outputs: Outputs::from([(String::from("dataset"), format!("{project}:{dataset}"))]),
        })
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let project = desired.param("project").unwrap_or_else(|| self.gcloud.project());
        let dataset = desired
            .param("dataset")
            .ok_or_else(|| DriverError::precondition("dataset id missing"))?;
        let location = desired.require("location")?;

        if let ObservedState::Present { attributes, .. } = self.inspect(desired).await? {
            let current = attributes.get("location").map(ToString::to_string).unwrap_or_default();
            if !current.eq_ignore_ascii_case(location) {
                return Err(DriverError::precondition(format!(
                    "dataset {project}:{dataset} is in {current}; a dataset cannot move to {location}"
                )));
            }
        } else {
            self.gcloud.enable_apis(required_apis(SectionName::Bq)).await?;
            info!("Creating BigQuery dataset {project}:{dataset} in {location}");
            let spec = self
                .bq(project)
                .arg(format!("--location={location}"))
                .args(["mk", "--dataset", &format!("{project}:{dataset}")])
                .timeout(self.gcloud.settings().deploy_timeout);
            self.gcloud.run(&spec).await?;
        }

        Ok(Outputs::from([(String::from("dataset"), format!("{project}:{dataset}"))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Namespace, RuntimeSettings};
    use crate::driver::command::{CommandOutput, MockCommandRunner};

    fn driver(runner: MockCommandRunner) -> BigQueryDriver {
        BigQueryDriver::new(Arc::new(Gcloud::new(
            Arc::new(runner),
            "acme-prod-1",
            "asia-northeast3",
            RuntimeSettings::default(),
        )))
    }

    fn desired() -> DesiredState {
        let config = ConfigStore::from_entries([
            (Namespace::Infra, keys::GCP_PROJECT_ID, "acme-prod-1"),
            (Namespace::Infra, keys::BIGQUERY_DATASET_ID, "analytics"),
        ]);
        match driver(MockCommandRunner::new()).desired_state(&config).unwrap() {
            Desired::Managed(state) => state,
            Desired::Unmanaged { reason } => panic!("{reason}"),
        }
    }

    fn not_found(spec: &CommandSpec) -> Result<CommandOutput, DriverError> {
        Err(DriverError::CommandFailed {
            command: spec.to_string(),
            status: 2,
            stderr: String::from("BigQuery error in show operation: Not found: Dataset acme-prod-1:analytics"),
        })
    }

    #[test]
    fn test_desired_defaults_location_and_project() {
        let desired = desired();
        assert_eq!(desired.value("location"), Some("US"));
        assert_eq!(desired.param("project"), Some("acme-prod-1"));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_absent() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "bq" && spec.has_arg("show"))
            .returning(not_found);
        let observed = driver(runner).inspect(&desired()).await.unwrap();
        assert_eq!(observed, ObservedState::Absent);
    }

    #[tokio::test]
    async fn test_reconcile_creates_dataset() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "bq" && spec.has_arg("show"))
            .returning(not_found);
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["services", "enable"]))
            .returning(|_| Ok(CommandOutput::default()));
        runner
            .expect_run()
            .withf(|spec| {
                spec.program == "bq" && spec.has_arg("--location=US") && spec.has_arg("acme-prod-1:analytics")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::default()));

        let outputs = driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap();
        assert_eq!(outputs.get("dataset").map(String::as_str), Some("acme-prod-1:analytics"));
    }

    #[tokio::test]
    async fn test_location_change_is_refused() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "bq" && spec.has_arg("show"))
            .returning(|_| Ok(CommandOutput::stdout(r#"{"location": "EU"}"#)));
        let err = driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Precondition { .. }));
    }
}
