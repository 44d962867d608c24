//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::sections::Request;

/// deploy-gcp - Plan and reconcile an application stack on Google Cloud.
#[derive(Parser, Debug)]
#[command(name = "deploy-gcp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Run root holding the `.env.*` files.
    #[arg(short = 'C', long = "chdir", global = true, default_value = ".", env = "DEPLOY_GCP_ROOT")]
    pub root: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "DEPLOY_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The run root with a leading `~` expanded to the home directory.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest))
}

/// Section selection shared by `plan`, `check` and `deploy`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Only these sections (comma separated), plus what they require.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}

impl SelectionArgs {
    /// The section request these flags describe.
    #[must_use]
    pub fn request(&self) -> Request {
        Request::from_only(&self.only)
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write example configuration files and update .gitignore.
    Init {
        /// Overwrite existing example files.
        #[arg(short, long)]
        force: bool,
    },

    /// Show what a deploy would change.
    Plan {
        /// Section selection.
        #[command(flatten)]
        selection: SelectionArgs,

        /// Show field diffs and the resolved configuration.
        #[arg(short, long)]
        all: bool,
    },

    /// Run read-only preflight checks.
    Check {
        /// Section selection.
        #[command(flatten)]
        selection: SelectionArgs,

        /// Show every check, not only issues.
        #[arg(short, long)]
        all: bool,
    },

    /// Plan and apply the changes.
    #[command(visible_alias = "apply")]
    Deploy {
        /// Section selection.
        #[command(flatten)]
        selection: SelectionArgs,

        /// Plan and report without changing anything.
        #[arg(long)]
        dry_run: bool,

        /// Halt after the first failed section.
        #[arg(long)]
        stop_on_first_failure: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_with_selection() {
        let cli = Cli::try_parse_from([
            "deploy-gcp",
            "-C",
            "/srv/app",
            "apply",
            "--only",
            "backend,frontend",
            "--dry-run",
            "-y",
        ])
        .unwrap();

        assert_eq!(cli.root, PathBuf::from("/srv/app"));
        match cli.command {
            Commands::Deploy {
                selection,
                dry_run,
                yes,
                stop_on_first_failure,
            } => {
                assert_eq!(
                    selection.request(),
                    Request::Only(vec![String::from("backend"), String::from("frontend")])
                );
                assert!(dry_run);
                assert!(yes);
                assert!(!stop_on_first_failure);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbosity_and_output_are_global() {
        let cli = Cli::try_parse_from(["deploy-gcp", "plan", "-a", "-vv", "--output", "json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Plan { selection, all } => {
                assert!(all);
                assert_eq!(selection.request(), Request::All);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_trailing_comma_in_only() {
        let cli = Cli::try_parse_from(["deploy-gcp", "plan", "--only", "backend,"]).unwrap();
        match cli.command {
            Commands::Plan { selection, .. } => {
                assert_eq!(selection.request(), Request::Only(vec![String::from("backend")]));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_home_is_expanded() {
        assert_eq!(expand_home(Path::new("/srv/app")), PathBuf::from("/srv/app"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/app")), home.join("app"));
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["deploy-gcp", "destroy"]).is_err());
    }
}
