//! Artifact Registry repository and container image builds.

use std::path::Path;

use tracing::info;

use crate::config::BuildMode;
use crate::error::DriverError;

use super::command::CommandSpec;
use super::gcloud::Gcloud;

/// Image URL in Artifact Registry.
#[must_use]
pub fn image_url(region: &str, project: &str, repo: &str, image: &str, tag: &str) -> String {
    format!("{region}-docker.pkg.dev/{project}/{repo}/{image}:{tag}")
}

/// Builds and pushes images for Cloud Run sections.
#[derive(Debug)]
pub struct ImageBuilder<'a> {
    gcloud: &'a Gcloud,
    repo: &'a str,
}

impl<'a> ImageBuilder<'a> {
    /// Creates a builder for a repository.
    #[must_use]
    pub const fn new(gcloud: &'a Gcloud, repo: &'a str) -> Self {
        Self { gcloud, repo }
    }

    /// Creates the docker repository if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the command error if describe or create fails.
    pub async fn ensure_repository(&self) -> Result<(), DriverError> {
        let location = format!("--location={}", self.gcloud.region());
        let existing = self
            .gcloud
            .describe(["artifacts", "repositories", "describe", self.repo, location.as_str()])
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        info!("Creating Artifact Registry repository {}", self.repo);
        let spec = self.gcloud.command([
            "artifacts",
            "repositories",
            "create",
            self.repo,
            "--repository-format=docker",
            location.as_str(),
        ]);
        self.gcloud.run(&spec).await.map(|_| ())
    }

    /// Builds `context_dir` and pushes it as `image`.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub async fn build_and_push(
        &self,
        image: &str,
        context_dir: &Path,
        mode: BuildMode,
    ) -> Result<(), DriverError> {
        let context = context_dir.display().to_string();
        let timeout = self.gcloud.build_timeout();
        info!("Building {image} from {context} ({mode})");

        match mode {
            BuildMode::CloudBuild => {
                let spec = self
                    .gcloud
                    .command(["builds", "submit", context.as_str(), "--tag", image])
                    .timeout(timeout)
                    .stream_output();
                self.gcloud.run(&spec).await?;
            }
            BuildMode::LocalDocker => {
                let registry = format!("{}-docker.pkg.dev", self.gcloud.region());
                let auth = CommandSpec::new("gcloud")
                    .args(["auth", "configure-docker", registry.as_str(), "--quiet"])
                    .timeout(timeout);
                self.gcloud.run(&auth).await?;

                let build = CommandSpec::new("docker")
                    .args(["build", "-t", image, context.as_str()])
                    .timeout(timeout)
                    .stream_output();
                self.gcloud.run(&build).await?;

                let push = CommandSpec::new("docker")
                    .args(["push", image])
                    .timeout(timeout)
                    .stream_output();
                self.gcloud.run(&push).await?;
            }
        }
        Ok(())
    }
}
