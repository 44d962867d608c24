//! The `init` command.
//!
//! Writes example configuration files into a run root and makes sure the
//! real configuration files are ignored by git. The real `.env.*` files are
//! never written.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;

/// Comment heading the block appended to `.gitignore`.
pub const GITIGNORE_MARKER: &str = "# deploy-gcp: ignore local env files";

/// Example files and their bundled content.
const TEMPLATES: &[(&str, &str)] = &[
    ("env.infra.example", include_str!("../templates/env.infra.example")),
    ("env.secrets.example", include_str!("../templates/env.secrets.example")),
    ("env.services.example", include_str!("../templates/env.services.example")),
];

/// Files `.gitignore` must list.
const IGNORED: &[&str] = &[".env.infra", ".env.secrets", ".env.services"];

/// What `init` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Example files written.
    pub created: Vec<PathBuf>,
    /// Example files left alone because they exist.
    pub skipped: Vec<PathBuf>,
    /// Ignore rules appended to `.gitignore`.
    pub ignored: Vec<String>,
}

/// Writes the example files into `root`.
///
/// Existing examples are kept unless `force` is set. `.gitignore` gets the
/// missing rules for the real configuration files; running twice adds
/// nothing.
///
/// # Errors
///
/// Returns `DeployError::Io` if the root or an example cannot be written.
/// `.gitignore` problems are logged and do not fail the command.
pub fn init(root: &Path, force: bool) -> Result<InitReport> {
    info!("Initializing deploy-gcp configuration in: {}", root.display());
    std::fs::create_dir_all(root)?;

    let mut report = InitReport::default();
    for (name, content) in TEMPLATES {
        let path = root.join(name);
        if path.exists() && !force {
            debug!("{} exists, skipping", path.display());
            report.skipped.push(path);
            continue;
        }
        std::fs::write(&path, content)?;
        report.created.push(path);
    }

    match update_gitignore(&root.join(".gitignore")) {
        Ok(added) => report.ignored = added,
        Err(err) => warn!("Could not update .gitignore: {err}"),
    }
    Ok(report)
}

/// Appends missing ignore rules under [`GITIGNORE_MARKER`]. Returns the
/// rules added.
fn update_gitignore(path: &Path) -> std::io::Result<Vec<String>> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };

    let missing: Vec<String> = IGNORED
        .iter()
        .filter(|rule| !existing.lines().any(|line| line.trim() == **rule))
        .map(|rule| (*rule).to_string())
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    let mut content = existing;
    if !content.is_empty() {
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push('\n');
    }
    content.push_str(GITIGNORE_MARKER);
    content.push('\n');
    for rule in &missing {
        content.push_str(rule);
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(missing)
}
