//! Read-only pre-deployment checks.
//!
//! Findings are either critical (the deploy cannot succeed as configured)
//! or warnings (the deploy will create or change something). Nothing here
//! mutates remote state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{BuildMode, ConfigStore, ConfigValidator, RuntimeSettings, keys};
use crate::driver::{
    CommandRunner, CommandSpec, DriverSet, Gcloud, HealthChecker, ObservedState, join_url,
    required_apis,
};
use crate::error::{DeployError, DriverError, Result};
use crate::planner::{ActionKind, Plan, Planner};
use crate::sections::{Request, SectionName, SectionRegistry};

/// Health probe attempts during `check`.
const HEALTH_ATTEMPTS: u32 = 1;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing to do.
    Ok,
    /// The deploy will create or change something.
    Warning,
    /// The deploy cannot succeed until this is fixed.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Area a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckGroup {
    /// Configuration files.
    Config,
    /// Local tools.
    Tools,
    /// Credentials, project and APIs.
    Project,
    /// A deployable section.
    Section(SectionName),
}

impl fmt::Display for CheckGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Tools => write!(f, "tools"),
            Self::Project => write!(f, "project"),
            Self::Section(section) => write!(f, "{section}"),
        }
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckItem {
    /// Area.
    pub group: CheckGroup,
    /// Severity.
    pub severity: Severity,
    /// Description.
    pub message: String,
}

/// All findings of a check run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    /// Project id, if configured.
    pub project: Option<String>,
    /// Region, if configured.
    pub region: Option<String>,
    /// Whether each catalogued section is enabled.
    pub toggles: Vec<(SectionName, bool)>,
    /// Findings in check order.
    pub items: Vec<CheckItem>,
}

impl CheckReport {
    fn push(&mut self, group: CheckGroup, severity: Severity, message: impl Into<String>) {
        self.items.push(CheckItem {
            group,
            severity,
            message: message.into(),
        });
    }

    /// Findings of one severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &CheckItem> {
        self.items.iter().filter(move |item| item.severity == severity)
    }

    /// Returns true if any finding is critical.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.with_severity(Severity::Critical).next().is_some()
    }

    /// Returns true if a configuration finding is critical.
    #[must_use]
    pub fn has_config_errors(&self) -> bool {
        self.with_severity(Severity::Critical)
            .any(|item| item.group == CheckGroup::Config)
    }

    /// Process exit code for this report: 2 for configuration errors, 1
    /// for other critical findings, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.has_config_errors() {
            2
        } else if self.has_critical() {
            1
        } else {
            0
        }
    }
}

/// Runs the `check` command.
pub struct Preflight {
    runner: Arc<dyn CommandRunner>,
    drivers: DriverSet,
    registry: SectionRegistry,
}

impl fmt::Debug for Preflight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preflight")
            .field("drivers", &self.drivers)
            .finish_non_exhaustive()
    }
}

impl Preflight {
    /// Creates a preflight over a command runner and the section drivers.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, drivers: DriverSet) -> Self {
        Self {
            runner,
            drivers,
            registry: SectionRegistry::new(),
        }
    }

    /// Runs every check.
    ///
    /// # Errors
    ///
    /// Returns a `PlanError` for an unknown or unsatisfiable `--only`
    /// selection. Every other problem becomes a finding.
    pub async fn run(&self, config: &ConfigStore, request: &Request) -> Result<CheckReport> {
        let mut report = CheckReport {
            project: config.get_opt(keys::GCP_PROJECT_ID).map(ToString::to_string),
            region: config.get_opt(keys::GCP_REGION).map(ToString::to_string),
            ..CheckReport::default()
        };
        for section in self.registry.all() {
            report
                .toggles
                .push((section.name, section.is_enabled(config).unwrap_or(false)));
        }

        let config_ok = Self::check_config(config, &mut report);

        let selection = match self.registry.resolve(request, config) {
            Ok(selection) => selection.order,
            Err(DeployError::Config(err)) => {
                report.push(CheckGroup::Config, Severity::Critical, err.to_string());
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let settings = RuntimeSettings::from_config(config).unwrap_or_default();
        let gcloud = Gcloud::new(
            Arc::clone(&self.runner),
            keys::string(config, keys::GCP_PROJECT_ID),
            keys::string(config, keys::GCP_REGION),
            settings,
        );

        let gcloud_available = self.check_tools(&selection, &settings, &mut report).await;
        if !config_ok || !gcloud_available {
            info!("Skipping remote checks until configuration and tools are fixed");
            return Ok(report);
        }
        if !Self::check_project(&gcloud, &selection, &mut report).await {
            return Ok(report);
        }

        let planner = Planner::new(self.drivers.clone(), settings);
        match planner.plan(config, request).await {
            Ok(plan) => {
                Self::check_sections(&plan, &mut report);
                Self::check_backend_health(config, &plan, &mut report).await;
            }
            Err(DeployError::Config(err)) => {
                report.push(CheckGroup::Config, Severity::Critical, err.to_string());
            }
            Err(err) => return Err(err),
        }
        Ok(report)
    }

    fn check_config(config: &ConfigStore, report: &mut CheckReport) -> bool {
        let validation = ConfigValidator::new().validate(config);
        for key in &validation.missing {
            report.push(
                CheckGroup::Config,
                Severity::Critical,
                format!("{key} is required but not set"),
            );
        }
        for error in &validation.errors {
            report.push(CheckGroup::Config, Severity::Critical, error.to_string());
        }
        for warning in &validation.warnings {
            report.push(CheckGroup::Config, Severity::Warning, warning.clone());
        }
        if validation.is_valid() {
            report.push(CheckGroup::Config, Severity::Ok, "configuration is complete");
        }
        validation.is_valid()
    }

    /// Returns false if `gcloud` itself is unusable.
    async fn check_tools(
        &self,
        selection: &[SectionName],
        settings: &RuntimeSettings,
        report: &mut CheckReport,
    ) -> bool {
        let mut tools = BTreeSet::from(["gcloud"]);
        let builds_images = selection.iter().any(|section| {
            matches!(
                section,
                SectionName::Backend | SectionName::Etl | SectionName::FrontendCloudRun
            )
        });
        if builds_images && settings.build_mode == BuildMode::LocalDocker {
            tools.insert("docker");
        }
        if selection.contains(&SectionName::Bq) {
            tools.insert("bq");
        }
        if selection.contains(&SectionName::Firebase) {
            tools.insert("firebase");
        }
        debug!("Checking tools {tools:?} (build mode {})", settings.build_mode);

        let mut gcloud_available = true;
        for tool in tools {
            let spec = CommandSpec::new(tool)
                .arg("--version")
                .timeout(settings.inspect_timeout);
            match self.runner.run(&spec).await {
                Ok(_) => report.push(CheckGroup::Tools, Severity::Ok, format!("{tool} is installed")),
                Err(err) => {
                    if tool == "gcloud" {
                        gcloud_available = false;
                    }
                    let message = match err {
                        DriverError::CommandNotFound { .. } => format!("{tool} is not installed"),
                        other => format!("{tool} is not usable: {other}"),
                    };
                    report.push(CheckGroup::Tools, Severity::Critical, message);
                }
            }
        }
        gcloud_available
    }

    /// Returns false if the project cannot be reached.
    async fn check_project(gcloud: &Gcloud, selection: &[SectionName], report: &mut CheckReport) -> bool {
        match gcloud.active_account().await {
            Ok(Some(account)) => report.push(
                CheckGroup::Project,
                Severity::Ok,
                format!("authenticated as {account}"),
            ),
            Ok(None) => {
                report.push(
                    CheckGroup::Project,
                    Severity::Critical,
                    "no active gcloud account (run `gcloud auth login`)",
                );
                return false;
            }
            Err(err) => {
                report.push(CheckGroup::Project, Severity::Critical, format!("cannot read gcloud credentials: {err}"));
                return false;
            }
        }

        let project = gcloud.project().to_string();
        match gcloud.describe(["projects", "describe", project.as_str()]).await {
            Ok(Some(_)) => report.push(CheckGroup::Project, Severity::Ok, format!("project {project} exists")),
            Ok(None) => {
                report.push(CheckGroup::Project, Severity::Critical, format!("project {project} not found"));
                return false;
            }
            Err(err) => {
                report.push(
                    CheckGroup::Project,
                    Severity::Critical,
                    format!("cannot describe project {project}: {err}"),
                );
                return false;
            }
        }

        let needed: BTreeSet<&str> = selection
            .iter()
            .flat_map(|section| required_apis(*section).iter().copied())
            .collect();
        match gcloud.enabled_apis().await {
            Ok(enabled) => {
                for api in needed {
                    if enabled.contains(api) {
                        report.push(CheckGroup::Project, Severity::Ok, format!("{api} is enabled"));
                    } else {
                        report.push(
                            CheckGroup::Project,
                            Severity::Warning,
                            format!("{api} is disabled and will be enabled"),
                        );
                    }
                }
            }
            Err(err) => report.push(
                CheckGroup::Project,
                Severity::Critical,
                format!("cannot list enabled APIs: {err}"),
            ),
        }
        true
    }

    fn check_sections(plan: &Plan, report: &mut CheckReport) {
        for skipped in &plan.skipped {
            report.push(
                CheckGroup::Section(skipped.section),
                Severity::Ok,
                format!("disabled ({})", skipped.reason),
            );
        }
        for action in &plan.actions {
            let group = CheckGroup::Section(action.section);
            let resource = action.resource();
            match action.kind {
                ActionKind::NoChange => report.push(group, Severity::Ok, format!("{resource} is up to date")),
                ActionKind::Skip => report.push(
                    group,
                    Severity::Ok,
                    format!("not managed: {}", action.reason.as_deref().unwrap_or("-")),
                ),
                ActionKind::Create => report.push(group, Severity::Warning, format!("{resource} will be created")),
                ActionKind::Update => report.push(
                    group,
                    Severity::Warning,
                    format!("{resource} will be updated ({} change(s))", action.diff.len()),
                ),
                ActionKind::InspectionFailed => report.push(
                    group,
                    Severity::Critical,
                    format!(
                        "{resource}: {}",
                        action.reason.as_deref().unwrap_or("inspection failed")
                    ),
                ),
            }
        }
    }

    async fn check_backend_health(config: &ConfigStore, plan: &Plan, report: &mut CheckReport) {
        let Some(path) = config.get_opt(keys::BACKEND_HEALTH_PATH) else {
            return;
        };
        let Some(url) = plan
            .action(SectionName::Backend)
            .and_then(|action| action.observed.as_ref())
            .and_then(ObservedState::outputs)
            .and_then(|outputs| outputs.get("url"))
        else {
            return;
        };

        let group = CheckGroup::Section(SectionName::Backend);
        let probe = join_url(url, path);
        match HealthChecker::new() {
            Ok(checker) => match checker.wait_for_healthy(&probe, HEALTH_ATTEMPTS).await {
                Ok(status) => report.push(group, Severity::Ok, status.to_string()),
                Err(err) => report.push(group, Severity::Warning, err.to_string()),
            },
            Err(err) => report.push(group, Severity::Warning, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::driver::command::{CommandOutput, MockCommandRunner};
    use crate::driver::testing::{FakeDriver, fake_set};
    use crate::driver::{Attributes, Outputs};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE: &[(Namespace, &str, &str)] = &[
        (Namespace::Infra, keys::GCP_PROJECT_ID, "acme-prod-1"),
        (Namespace::Infra, keys::GCP_REGION, "asia-northeast3"),
        (
            Namespace::Infra,
            keys::DEPLOY_SERVICE_ACCOUNT_EMAIL,
            "deployer@acme-prod-1.iam.gserviceaccount.com",
        ),
        (Namespace::Infra, keys::ARTIFACT_REGISTRY_REPO, "apps"),
    ];

    fn config(extra: &[(Namespace, &'static str, &'static str)]) -> ConfigStore {
        ConfigStore::from_entries(BASE.iter().chain(extra).copied())
    }

    /// A runner where tools exist, the account is active, the project
    /// exists and only Cloud Run is enabled.
    fn healthy_runner() -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.has_arg("--version"))
            .returning(|_| Ok(CommandOutput::stdout("1.0")));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["auth", "list"]))
            .returning(|_| Ok(CommandOutput::stdout("deployer@acme-prod-1.iam.gserviceaccount.com\n")));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["projects", "describe"]))
            .returning(|_| Ok(CommandOutput::stdout(r#"{"projectId": "acme-prod-1"}"#)));
        runner
            .expect_run()
            .withf(|spec| spec.starts_with(&["services", "list"]))
            .returning(|_| Ok(CommandOutput::stdout("run.googleapis.com\n")));
        runner
    }

    fn drivers() -> DriverSet {
        fake_set(vec![
            FakeDriver::new(SectionName::Secrets).up_to_date(),
            FakeDriver::new(SectionName::Backend),
            FakeDriver::new(SectionName::Frontend).fail_inspect("PERMISSION_DENIED"),
        ])
        .0
    }

    #[tokio::test]
    async fn test_missing_config_is_critical_and_skips_remote_checks() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.has_arg("--version"))
            .returning(|_| Ok(CommandOutput::default()));
        let preflight = Preflight::new(Arc::new(runner), drivers());

        let report = preflight.run(&ConfigStore::default(), &Request::All).await.unwrap();
        assert!(report.has_config_errors());
        assert_eq!(report.exit_code(), 2);
        assert!(report
            .items
            .iter()
            .any(|item| item.message.contains("GCP_PROJECT_ID")));
    }

    #[tokio::test]
    async fn test_missing_gcloud_is_critical() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|spec| {
            Err(DriverError::CommandNotFound {
                program: spec.program.clone(),
            })
        });
        let preflight = Preflight::new(Arc::new(runner), drivers());
        let report = preflight.run(&config(&[]), &Request::All).await.unwrap();
        assert_eq!(report.exit_code(), 1);
        assert!(report
            .with_severity(Severity::Critical)
            .any(|item| item.message == "gcloud is not installed"));
    }

    #[tokio::test]
    async fn test_classifies_sections_and_apis() {
        let preflight = Preflight::new(Arc::new(healthy_runner()), drivers());
        let report = preflight.run(&config(&[]), &Request::All).await.unwrap();

        let find = |group: CheckGroup| {
            report
                .items
                .iter()
                .filter(move |item| item.group == group)
                .map(|item| item.severity)
                .collect::<Vec<_>>()
        };
        assert_eq!(find(CheckGroup::Section(SectionName::Secrets)), vec![Severity::Ok]);
        assert_eq!(find(CheckGroup::Section(SectionName::Backend)), vec![Severity::Warning]);
        assert_eq!(find(CheckGroup::Section(SectionName::Frontend)), vec![Severity::Critical]);
        assert!(report
            .with_severity(Severity::Warning)
            .any(|item| item.message.contains("artifactregistry.googleapis.com")));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_unknown_section_is_an_error() {
        let preflight = Preflight::new(Arc::new(MockCommandRunner::new()), drivers());
        let err = preflight
            .run(&config(&[]), &Request::Only(vec![String::from("bogus")]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Plan(_)));
    }

    #[tokio::test]
    async fn test_backend_health_is_probed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (drivers, _) = fake_set(vec![
            FakeDriver::new(SectionName::Secrets).up_to_date(),
            FakeDriver::new(SectionName::Backend).up_to_date().observed(ObservedState::Present {
                attributes: Attributes::from([(
                    String::from("version"),
                    crate::driver::Attribute::plain("1"),
                )]),
                outputs: Outputs::from([(String::from("url"), server.uri())]),
            }),
            FakeDriver::new(SectionName::Frontend).up_to_date(),
        ]);
        let preflight = Preflight::new(Arc::new(healthy_runner()), drivers);
        let report = preflight
            .run(&config(&[(Namespace::Services, keys::BACKEND_HEALTH_PATH, "/healthz")]), &Request::All)
            .await
            .unwrap();
        assert!(report
            .items
            .iter()
            .any(|item| item.group == CheckGroup::Section(SectionName::Backend)
                && item.severity == Severity::Ok
                && item.message.contains("healthy")));
    }
}
