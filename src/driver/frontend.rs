//! Frontend build.
//!
//! A local build has no remote counterpart, so every run rebuilds it. The
//! build output carries a small JSON marker recording what it was built
//! from; it is published with the site and only ever read back from the
//! live hosting URL.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ConfigHasher, ConfigStore, keys};
use crate::error::{ConfigError, ConfigResult, DriverError};
use crate::sections::SectionName;

use super::cloud_run::api_url;
use super::command::CommandSpec;
use super::gcloud::Gcloud;
use super::{Attributes, BuildContext, Desired, DesiredState, ObservedState, Outputs, ResourceDriver};

/// File written into the build directory after a successful build.
pub const BUILD_MARKER: &str = ".deploy-gcp.json";

/// Directories never included in the sources digest.
const IGNORED_DIRS: &[&str] = &["node_modules"];

/// Contents of [`BUILD_MARKER`].
#[derive(Debug, Clone, Serialize)]
struct BuildMarker {
    api_url: String,
    build_command: String,
    sources: String,
    build_digest: String,
    built_at: DateTime<Utc>,
}

/// Runs the frontend build command with the backend URL injected.
#[derive(Debug)]
pub struct FrontendDriver {
    gcloud: Arc<Gcloud>,
    root: PathBuf,
    hasher: ConfigHasher,
}

impl FrontendDriver {
    /// Creates the driver for a project root.
    #[must_use]
    pub fn new(gcloud: Arc<Gcloud>, root: &Path) -> Self {
        Self {
            gcloud,
            root: root.to_path_buf(),
            hasher: ConfigHasher::new(),
        }
    }

    fn build_digest(&self, api_url: &str, build_command: &str, sources: &str) -> String {
        self.hasher.fingerprint([api_url, build_command, sources])
    }

    /// Digest over relative paths, sizes and modification times of every
    /// source file.
    fn sources_digest(&self, source_dir: &Path, build_dir: &Path) -> std::io::Result<String> {
        let mut files = Vec::new();
        collect_files(source_dir, source_dir, build_dir, &mut files)?;
        files.sort();
        Ok(self.hasher.fingerprint(files.iter().map(String::as_str)))
    }
}

fn collect_files(
    base: &Path,
    dir: &Path,
    build_dir: &Path,
    files: &mut Vec<String>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) || path == build_dir {
                continue;
            }
            collect_files(base, &path, build_dir, files)?;
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |elapsed| elapsed.as_secs());
            let relative = path.strip_prefix(base).unwrap_or(&path);
            files.push(format!("{}:{}:{modified}", relative.display(), metadata.len()));
        }
    }
    Ok(())
}

#[async_trait]
impl ResourceDriver for FrontendDriver {
    fn section(&self) -> SectionName {
        SectionName::Frontend
    }

    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired> {
        let source_dir = self.root.join(keys::string(config, keys::FRONTEND_SOURCE_DIR));
        if !source_dir.is_dir() {
            return Ok(Desired::Unmanaged {
                reason: format!("{} is not a directory", source_dir.display()),
            });
        }
        let build_dir = source_dir.join(keys::string(config, keys::FRONTEND_BUILD_DIR));
        let sources = self.sources_digest(&source_dir, &build_dir).map_err(|e| {
            ConfigError::invalid(
                keys::FRONTEND_SOURCE_DIR,
                format!("cannot read {}: {e}", source_dir.display()),
            )
        })?;

        Ok(Desired::Managed(
            DesiredState::new(format!("build {}", build_dir.display()))
                .with("api_url", api_url(config))
                .with_plain("build_command", keys::string(config, keys::FRONTEND_BUILD_COMMAND))
                .with_plain("sources", sources)
                .with_param("source_dir", source_dir.display().to_string())
                .with_param("build_dir", build_dir.display().to_string())
                .with_param("api_var", keys::string(config, keys::FRONTEND_API_URL_VAR)),
        ))
    }

    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError> {
        let build_dir = desired
            .param("build_dir")
            .ok_or_else(|| DriverError::precondition("build directory missing"))?;
        debug!("{build_dir} is rebuilt on every run");
        Ok(ObservedState::present(Attributes::new()))
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        let api_url = desired.require("api_url")?;
        let build_command = desired.require("build_command")?;
        let sources = desired.require("sources")?;
        let source_dir = desired
            .param("source_dir")
            .ok_or_else(|| DriverError::precondition("frontend directory missing"))?;
        let build_dir = desired
            .param("build_dir")
            .ok_or_else(|| DriverError::precondition("build directory missing"))?;
        let api_var = desired.param("api_var").unwrap_or("VITE_API_BASE_URL");

        info!("Building frontend in {source_dir} ({api_var}={api_url})");
        let spec = CommandSpec::new("sh")
            .args(["-c", build_command])
            .cwd(source_dir)
            .env(api_var, api_url)
            .timeout(self.gcloud.build_timeout())
            .stream_output();
        self.gcloud.run(&spec).await?;

        let marker = BuildMarker {
            api_url: api_url.to_string(),
            build_command: build_command.to_string(),
            sources: sources.to_string(),
            build_digest: self.build_digest(api_url, build_command, sources),
            built_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&marker)
            .map_err(|e| DriverError::invalid_response(format!("cannot encode build marker: {e}")))?;
        tokio::fs::create_dir_all(build_dir).await.map_err(|e| {
            DriverError::precondition(format!("build did not produce {build_dir}: {e}"))
        })?;
        let marker_path = Path::new(build_dir).join(BUILD_MARKER);
        tokio::fs::write(&marker_path, content).await.map_err(|e| {
            DriverError::precondition(format!("cannot write {}: {e}", marker_path.display()))
        })?;

        Ok(Outputs::from([
            (String::from("build_dir"), build_dir.to_string()),
            (String::from("build_digest"), marker.build_digest),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Namespace, RuntimeSettings};
    use crate::driver::command::{CommandOutput, MockCommandRunner};
    use tempfile::TempDir;

    fn driver(runner: MockCommandRunner, root: &Path) -> FrontendDriver {
        FrontendDriver::new(
            Arc::new(Gcloud::new(
                Arc::new(runner),
                "acme-prod-1",
                "asia-northeast3",
                RuntimeSettings::default(),
            )),
            root,
        )
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let frontend = dir.path().join("frontend");
        fs::create_dir_all(frontend.join("src")).unwrap();
        fs::create_dir_all(frontend.join("node_modules/react")).unwrap();
        fs::create_dir_all(frontend.join("dist")).unwrap();
        fs::write(frontend.join("package.json"), "{}").unwrap();
        fs::write(frontend.join("src/main.ts"), "console.log(1)").unwrap();
        fs::write(frontend.join("node_modules/react/index.js"), "x").unwrap();
        fs::write(frontend.join("dist/index.html"), "<html>").unwrap();
        dir
    }

    fn config() -> ConfigStore {
        ConfigStore::from_entries([(Namespace::Services, keys::BACKEND_API_HOST, "https://api.example.com")])
    }

    fn managed(desired: Desired) -> DesiredState {
        match desired {
            Desired::Managed(state) => state,
            Desired::Unmanaged { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn test_missing_directory_is_unmanaged() {
        let dir = TempDir::new().unwrap();
        let desired = driver(MockCommandRunner::new(), dir.path())
            .desired_state(&config())
            .unwrap();
        assert!(matches!(desired, Desired::Unmanaged { .. }));
    }

    #[test]
    fn test_sources_digest_ignores_dependencies_and_output() {
        let dir = project();
        let driver = driver(MockCommandRunner::new(), dir.path());
        let before = managed(driver.desired_state(&config()).unwrap());

        fs::write(dir.path().join("frontend/node_modules/react/index.js"), "changed").unwrap();
        fs::write(dir.path().join("frontend/dist/index.html"), "changed output").unwrap();
        let after = managed(driver.desired_state(&config()).unwrap());
        assert_eq!(before.value("sources"), after.value("sources"));

        fs::write(dir.path().join("frontend/src/extra.ts"), "new file").unwrap();
        let changed = managed(driver.desired_state(&config()).unwrap());
        assert_ne!(before.value("sources"), changed.value("sources"));
    }

    #[tokio::test]
    async fn test_build_is_always_planned_and_marker_is_published() {
        let dir = project();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.program == "sh"
                    && spec.args == ["-c", "npm run build"]
                    && spec.stream
                    && spec.env.contains(&(
                        String::from("VITE_API_BASE_URL"),
                        String::from("https://api.example.com"),
                    ))
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::default()));
        let driver = driver(runner, dir.path());
        let desired = managed(driver.desired_state(&config()).unwrap());
        let rebuild = ObservedState::present(Attributes::new());

        assert_eq!(driver.inspect(&desired).await.unwrap(), rebuild);
        let outputs = driver.reconcile(&desired, &BuildContext::new()).await.unwrap();

        let marker_path = dir.path().join("frontend/dist").join(BUILD_MARKER);
        let marker: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(marker_path).unwrap()).unwrap();
        assert_eq!(
            marker["build_digest"].as_str(),
            outputs.get("build_digest").map(String::as_str)
        );
        assert_eq!(marker["api_url"], "https://api.example.com");

        // The published marker does not make the next run skip the build.
        assert_eq!(driver.inspect(&desired).await.unwrap(), rebuild);
    }
}
