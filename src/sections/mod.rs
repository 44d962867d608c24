//! Deployable sections.
//!
//! The topology is fixed: every section is a variant of [`SectionName`] and
//! its toggles and dependency edges live in a static table in
//! [`registry`].

mod registry;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use registry::{Condition, Dependency, Request, Section, SectionRegistry, Selection, SkippedSection};

/// Identity of a deployable section, in catalog declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    /// Cloud Run backend service.
    Backend,
    /// Cloud Run job.
    Etl,
    /// BigQuery dataset.
    Bq,
    /// Cloud SQL database.
    Sql,
    /// GCS bucket.
    Gcs,
    /// Secret Manager secrets.
    Secrets,
    /// Static frontend build.
    Frontend,
    /// Frontend served from Cloud Run.
    FrontendCloudRun,
    /// Firebase Hosting.
    Firebase,
}

impl SectionName {
    /// Every section in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Backend,
        Self::Etl,
        Self::Bq,
        Self::Sql,
        Self::Gcs,
        Self::Secrets,
        Self::Frontend,
        Self::FrontendCloudRun,
        Self::Firebase,
    ];

    /// Stable name used on the command line and in output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Etl => "etl",
            Self::Bq => "bq",
            Self::Sql => "sql",
            Self::Gcs => "gcs",
            Self::Secrets => "secrets",
            Self::Frontend => "frontend",
            Self::FrontendCloudRun => "frontend_cloud_run",
            Self::Firebase => "firebase",
        }
    }

    /// Position in the catalog.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Comma separated list of every valid name.
    #[must_use]
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for name in SectionName::ALL {
            assert_eq!(name.as_str().parse::<SectionName>(), Ok(name));
        }
        assert!("Backend".parse::<SectionName>().is_err());
    }

    #[test]
    fn test_index_matches_declaration_order() {
        for (position, name) in SectionName::ALL.iter().enumerate() {
            assert_eq!(name.index(), position);
        }
    }
}
