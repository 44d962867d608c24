//! Firebase Hosting release of the frontend build.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ConfigStore, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::command::CommandSpec;
use super::frontend::BUILD_MARKER;
use super::gcloud::{Gcloud, json_str};
use super::health::{HealthChecker, join_url};
use super::{Attribute, Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// Deploys the frontend build directory to Firebase Hosting.
///
/// The live release is identified by the build marker served next to the
/// site's files.
#[derive(Debug)]
pub struct FirebaseDriver {
    gcloud: Arc<Gcloud>,
    root: PathBuf,
    hosting_base: Option<String>,
}

impl FirebaseDriver {
    /// Creates the driver for a project root.
    #[must_use]
    pub fn new(gcloud: Arc<Gcloud>, root: &Path) -> Self {
        Self {
            gcloud,
            root: root.to_path_buf(),
            hosting_base: None,
        }
    }

    /// Reads the live release from `base` instead of `https://<site>.web.app`.
    #[must_use]
    pub fn with_hosting_base(mut self, base: impl Into<String>) -> Self {
        self.hosting_base = Some(base.into());
        self
    }
}

#[async_trait]
impl ResourceDriver for FirebaseDriver {
    fn section(&self) -> SectionName {
        SectionName::Firebase
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let project = config
            .get_opt(keys::FIREBASE_PROJECT_ID)
            .map_or_else(|| keys::string(config, keys::GCP_PROJECT_ID), ToString::to_string);
        let site = config
            .get_opt(keys::FIREBASE_HOSTING_SITE)
            .map_or_else(|| project.clone(), ToString::to_string);
        let url = self
            .hosting_base
            .clone()
            .unwrap_or_else(|| format!("https://{site}.web.app"));

        let mut desired = DesiredState::new(format!("hosting/{site}"))
            .with("release", Attribute::Output(String::from("frontend.build_digest")))
            .with_param("project", project)
            .with_param("url", url)
            .with_param(
                "source_dir",
                self.root
                    .join(keys::string(config, keys::FRONTEND_SOURCE_DIR))
                    .display()
                    .to_string(),
            );
        if config.get_opt(keys::FIREBASE_HOSTING_SITE).is_some() {
            desired = desired.with_param("site", site);
        }
        Ok(Desired::Managed(desired))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let url = desired
            .param("url")
            .ok_or_else(|| DriverError::precondition("hosting URL missing"))?;
        let checker = HealthChecker::new()?;
        let Some(marker) = checker.get_json(&join_url(url, BUILD_MARKER)).await? else {
            return Ok(ObservedState::Absent);
        };

        let mut attributes = Attributes::new();
        if let Some(digest) = json_str(&marker, "/build_digest") {
            attributes.insert(String::from("release"), Attribute::plain(digest));
        }
        Ok(ObservedState::Present {
            attributes,
            outputs: Outputs::from([(String::from("url"), url.to_string())]),
        })
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let project = desired
            .param("project")
            .ok_or_else(|| DriverError::precondition("Firebase project missing"))?;
        let url = desired.param("url").unwrap_or_default();
        let source_dir = desired.param("source_dir").unwrap_or(".");
        let target = desired
            .param("site")
            .map_or_else(|| String::from("hosting"), |site| format!("hosting:{site}"));
        desired.require("release")?;

        info!("Releasing {source_dir} to Firebase Hosting ({project})");
        let spec = CommandSpec::new("firebase")
            .args(["deploy", "--only", target.as_str(), "--project", project, "--non-interactive"])
            .cwd(source_dir)
            .timeout(self.gcloud.settings().deploy_timeout);
        self.gcloud.run(&spec).await?;

        Ok(Outputs::from([(String::from("url"), url.to_string())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Namespace, RuntimeSettings};
    use crate::driver::command::{CommandOutput, MockCommandRunner};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(runner: MockCommandRunner) -> FirebaseDriver {
        FirebaseDriver::new(
            Arc::new(Gcloud::new(
                Arc::new(runner),
                "acme-prod-1",
                "asia-northeast3",
                RuntimeSettings::default(),
            )),
            Path::new("/srv/app"),
        )
    }

    fn managed(desired: Desired) -> DesiredState {
        match desired {
            Desired::Managed(state) => state,
            Desired::Unmanaged { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn test_site_defaults_to_project() {
        let config = ConfigStore::from_entries([(Namespace::Infra, keys::GCP_PROJECT_ID, "acme-prod-1")]);
        let desired = managed(driver(MockCommandRunner::new()).desired_state(&config).unwrap());
        assert_eq!(desired.param("url"), Some("https://acme-prod-1.web.app"));
        assert_eq!(desired.param("site"), None);
        assert_eq!(
            desired.attributes.get("release"),
            Some(&Attribute::Output(String::from("frontend.build_digest")))
        );
    }

    #[tokio::test]
    async fn test_inspect_reads_live_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.deploy-gcp.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "build_digest": "abc123"
            })))
            .mount(&server)
            .await;

        let driver = driver(MockCommandRunner::new()).with_hosting_base(server.uri());
        let desired = managed(driver.desired_state(&ConfigStore::default()).unwrap());
        let observed = driver.inspect(&desired).await.unwrap();
        let ObservedState::Present { attributes, .. } = observed else {
            panic!("expected present state");
        };
        assert_eq!(attributes.get("release"), Some(&Attribute::plain("abc123")));
    }

    #[tokio::test]
    async fn test_never_released_site_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let driver = driver(MockCommandRunner::new()).with_hosting_base(server.uri());
        let desired = managed(driver.desired_state(&ConfigStore::default()).unwrap());
        assert_eq!(driver.inspect(&desired).await.unwrap(), ObservedState::Absent);
    }

    #[tokio::test]
    async fn test_reconcile_deploys_hosting_target() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.program == "firebase"
                    && spec.starts_with(&["deploy", "--only", "hosting:marketing", "--project", "acme-web"])
                    && spec.cwd.as_deref() == Some(Path::new("/srv/app/frontend"))
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::default()));

        let config = ConfigStore::from_entries([
            (Namespace::Infra, keys::FIREBASE_PROJECT_ID, "acme-web"),
            (Namespace::Infra, keys::FIREBASE_HOSTING_SITE, "marketing"),
        ]);
        let driver = driver(runner);
        let desired = managed(driver.desired_state(&config).unwrap());
        let mut context = BuildContext::new();
        context.record(
            SectionName::Frontend,
            &Outputs::from([(String::from("build_digest"), String::from("abc123"))]),
        );
        let resolved = context.resolve_all(&desired).unwrap();

        let outputs = driver.reconcile(&resolved, &context).await.unwrap();
        assert_eq!(outputs.get("url").map(String::as_str), Some("https://marketing.web.app"));
    }
}
