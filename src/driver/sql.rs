//! Database inside an existing Cloud SQL instance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ConfigStore, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::gcloud::{Gcloud, json_str, required_apis};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Ensures the database exists. The instance itself is never created.
#[derive(Debug)]
pub struct CloudSqlDriver {
    gcloud: Arc<Gcloud>,
}

impl CloudSqlDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(gcloud: Arc<Gcloud>) -> Self {
        Self { gcloud }
    }

    fn names(desired: &DesiredState) -> Result<(&str, &str), DriverError> {
        let instance = desired
            .param("instance")
            .ok_or_else(|| DriverError::precondition("Cloud SQL instance missing"))?;
        let database = desired
            .param("database")
            .ok_or_else(|| DriverError::precondition("Cloud SQL database missing"))?;
        Ok((instance, database))
    }
}

#[async_trait]
impl ResourceDriver for CloudSqlDriver {
    fn section(&self) -> SectionName {
        SectionName::Sql
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let instance = keys::string(config, keys::CLOUD_SQL_INSTANCE_NAME);
        let database = keys::string(config, keys::CLOUD_SQL_DB_NAME);
        Ok(Desired::Managed(
            DesiredState::new(format!("sql/{instance}/databases/{database}"))
                .with_plain("database", database.clone())
                .with_param("instance", instance)
                .with_param("database", database),
        ))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let (instance, database) = Self::names(desired)?;

        let Some(found) = self
            .gcloud
            .describe(["sql", "instances", "describe", instance])
            .await?
        else {
            return Ok(ObservedState::Unknown {
                reason: format!("Cloud SQL instance {instance} does not exist and is not managed here"),
            });
        };
        let mut outputs = Outputs::new();
        if let Some(connection) = json_str(&found, "/connectionName") {
            outputs.insert(String::from("connection_name"), connection.to_string());
        }

        let instance_arg = format!("--instance={instance}");
        let db = self
            .gcloud
            .describe(["sql", "databases", "describe", database, instance_arg.as_str()])
            .await?;
        Ok(match db {
            None => ObservedState::Absent,
            Some(db) => {
                let mut attributes = Attributes::new();
                if let Some(name) = json_str(&db, "/name") {
                    attributes.insert(String::from("database"), Attribute::plain(name));
                }
                ObservedState::Present { attributes, outputs }
            }
        })
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let (instance, database) = Self::names(desired)?;
        self.gcloud.enable_apis(required_apis(SectionName::Sql)).await?;

        let outputs = match self.inspect(desired).await? {
            ObservedState::Unknown { reason } => return Err(DriverError::precondition(reason)),
            ObservedState::Present { outputs, .. } => outputs,
            ObservedState::Absent => {
                info!("Creating database {database} on {instance}");
                let instance_arg = format!("--instance={instance}");
                let spec = self
                    .gcloud
                    .command(["sql", "databases", "create", database, instance_arg.as_str()]);
                self.gcloud.run(&spec).await?;

                let found = self
                    .gcloud
                    .describe(["sql", "instances", "describe", instance])
                    .await?;
                found
                    .as_ref()
                    .and_then(|value| json_str(value, "/connectionName"))
                    .map(|connection| {
                        Outputs::from([(String::from("connection_name"), connection.to_string())])
                    })
                    .unwrap_or_default()
            }
        };
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Namespace, RuntimeSettings};
    use crate::driver::command::{CommandOutput, CommandSpec, MockCommandRunner};

    fn driver(runner: MockCommandRunner) -> CloudSqlDriver {
        CloudSqlDriver::new(Arc::new(Gcloud::new(
            Arc::new(runner),
            "acme-prod-1",
            "asia-northeast3",
            RuntimeSettings::default(),
        )))
    }

    fn desired() -> DesiredState {
        let config = ConfigStore::from_entries([
            (Namespace::Infra, keys::CLOUD_SQL_INSTANCE_NAME, "main-pg"),
            (Namespace::Infra, keys::CLOUD_SQL_DB_NAME, "app"),
        ]);
        match driver(MockCommandRunner::new()).desired_state(&config).unwrap() {
            Desired::Managed(state) => state,
            Desired::Unmanaged { reason } => panic!("{reason}"),
        }
    }

    fn not_found(spec: &CommandSpec) -> Result<CommandOutput, DriverError> {
        Err(DriverError::CommandFailed {
            command: spec.to_string(),
            status: 1,
            stderr: String::from("ERROR: (gcloud.sql) NOT_FOUND"),
        })
    }

    const INSTANCE_JSON: &str = r#"{"connectionName": "acme-prod-1:asia-northeast3:main-pg"}"#;

    #[tokio::test]
    async fn test_missing_instance_is_unknown() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "instances", "describe"]))
            .returning(not_found);
        let observed = driver(runner).inspect(&desired()).await.unwrap();
        assert!(matches!(observed, ObservedState::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_existing_database_is_present() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "instances", "describe"]))
            .returning(|_| Ok(CommandOutput::stdout(INSTANCE_JSON)));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "databases", "describe", "app"]))
            .returning(|_| Ok(CommandOutput::stdout(r#"{"name": "app"}"#)));

        let observed = driver(runner).inspect(&desired()).await.unwrap();
        let ObservedState::Present { attributes, outputs } = observed else {
            panic!("expected present state");
        };
        assert_eq!(attributes.get("database"), Some(&Attribute::plain("app")));
        assert_eq!(
            outputs.get("connection_name").map(String::as_str),
            Some("acme-prod-1:asia-northeast3:main-pg")
        );
    }

    #[tokio::test]
    async fn test_reconcile_creates_database() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["services", "enable"]))
            .returning(|_| Ok(CommandOutput::default()));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "instances", "describe"]))
            .returning(|_| Ok(CommandOutput::stdout(INSTANCE_JSON)));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "databases", "describe"]))
            .returning(not_found);
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["sql", "databases", "create", "app", "--instance=main-pg"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::default()));

        let outputs = driver(runner)
            .reconcile(&desired(), &BuildContext::new())
            .await
            .unwrap();
        assert!(outputs.contains_key("connection_name"));
    }
}
