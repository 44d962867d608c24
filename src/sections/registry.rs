//! Static section catalog, selection and ordering.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::{ConfigStore, keys};
use crate::error::{ConfigResult, PlanError, Result};

use super::SectionName;

/// When a hard dependency applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Always.
    Always,
    /// Unless the key is set, e.g. an external backend host.
    UnlessSet(&'static str),
    /// Only while the key is set, e.g. a list of mounted secrets.
    WhenSet(&'static str),
}

impl Condition {
    /// Returns true if the dependency applies under `config`.
    #[must_use]
    pub fn holds(self, config: &ConfigStore) -> bool {
        match self {
            Self::Always => true,
            Self::UnlessSet(key) => !config.contains(key),
            Self::WhenSet(key) => config.contains(key),
        }
    }
}

/// A hard dependency, possibly conditional on configuration.
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    /// Section that must be present first.
    pub section: SectionName,
    /// When the dependency applies.
    pub when: Condition,
}

/// Catalog entry for one section.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    /// Section identity.
    pub name: SectionName,
    /// Boolean keys that must all be true for the section to be enabled.
    pub toggles: &'static [&'static str],
    /// Hard dependencies, added to the selection automatically.
    pub requires: &'static [Dependency],
    /// Ordering-only dependencies, honoured when both are selected.
    pub runs_after: &'static [SectionName],
}

const DATA_SERVICES: &[SectionName] = &[
    SectionName::Secrets,
    SectionName::Sql,
    SectionName::Gcs,
    SectionName::Bq,
];

const NEEDS_BACKEND: &[Dependency] = &[Dependency {
    section: SectionName::Backend,
    when: Condition::UnlessSet(keys::BACKEND_API_HOST),
}];

const MOUNTS_SECRETS: &[Dependency] = &[Dependency {
    section: SectionName::Secrets,
    when: Condition::WhenSet(keys::BACKEND_SECRETS),
}];

static CATALOG: [Section; 9] = [
    Section {
        name: SectionName::Backend,
        toggles: &[keys::DEPLOY_BACKEND],
        requires: MOUNTS_SECRETS,
        runs_after: DATA_SERVICES,
    },
    Section {
        name: SectionName::Etl,
        toggles: &[keys::DEPLOY_ETL_JOB],
        requires: MOUNTS_SECRETS,
        runs_after: DATA_SERVICES,
    },
    Section {
        name: SectionName::Bq,
        toggles: &[keys::ENABLE_BIGQUERY],
        requires: &[],
        runs_after: &[],
    },
    Section {
        name: SectionName::Sql,
        toggles: &[keys::ENABLE_CLOUD_SQL],
        requires: &[],
        runs_after: &[],
    },
    Section {
        name: SectionName::Gcs,
        toggles: &[keys::ENABLE_GCS],
        requires: &[],
        runs_after: &[],
    },
    Section {
        name: SectionName::Secrets,
        toggles: &[keys::ENABLE_SECRET_MANAGER, keys::CONFIGURE_SECRETS],
        requires: &[],
        runs_after: &[],
    },
    Section {
        name: SectionName::Frontend,
        toggles: &[keys::DEPLOY_FRONTEND],
        requires: NEEDS_BACKEND,
        runs_after: &[],
    },
    Section {
        name: SectionName::FrontendCloudRun,
        toggles: &[keys::DEPLOY_FRONTEND, keys::DEPLOY_FRONTEND_CLOUD_RUN],
        requires: NEEDS_BACKEND,
        runs_after: &[],
    },
    Section {
        name: SectionName::Firebase,
        toggles: &[keys::DEPLOY_FRONTEND, keys::ENABLE_FIREBASE],
        requires: &[Dependency {
            section: SectionName::Frontend,
            when: Condition::Always,
        }],
        runs_after: &[],
    },
];

impl Section {
    /// Returns the `KEY=false` toggle disabling this section, if any.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` if a toggle is not a boolean.
    pub fn disabled_by(&self, config: &ConfigStore) -> ConfigResult<Option<String>> {
        for toggle in self.toggles {
            if !keys::flag(config, toggle)? {
                return Ok(Some(format!("{toggle}=false")));
            }
        }
        Ok(None)
    }

    /// Returns true if every toggle is on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` if a toggle is not a boolean.
    pub fn is_enabled(&self, config: &ConfigStore) -> ConfigResult<bool> {
        Ok(self.disabled_by(config)?.is_none())
    }

    /// Hard dependencies that apply under this configuration.
    #[must_use]
    pub fn effective_requires(&self, config: &ConfigStore) -> Vec<SectionName> {
        self.requires
            .iter()
            .filter(|dep| dep.when.holds(config))
            .map(|dep| dep.section)
            .collect()
    }
}

/// Which sections the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Request {
    /// Every section in the catalog.
    #[default]
    All,
    /// Only the named sections, as typed by the operator.
    Only(Vec<String>),
}

impl Request {
    /// Builds a request from an `--only` list. Blank entries are dropped;
    /// a list with no names means all.
    #[must_use]
    pub fn from_only(only: &[String]) -> Self {
        let names: Vec<String> = only
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();
        if names.is_empty() { Self::All } else { Self::Only(names) }
    }
}

/// A requested section that was not selected because it is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSection {
    /// The section.
    pub section: SectionName,
    /// The toggle that disabled it, e.g. `DEPLOY_ETL_JOB=false`.
    pub reason: String,
}

/// Result of resolving a request against configuration.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Selected sections in execution order.
    pub order: Vec<SectionName>,
    /// Requested sections disabled by configuration.
    pub skipped: Vec<SkippedSection>,
    /// Sections added only by dependency expansion.
    pub implied: Vec<SectionName>,
    /// Dependencies of each selected section, restricted to the selection.
    pub depends_on: BTreeMap<SectionName, Vec<SectionName>>,
}

/// Immutable catalog of deployable sections.
#[derive(Debug, Clone, Copy)]
pub struct SectionRegistry {
    sections: &'static [Section; 9],
}

impl Default for SectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionRegistry {
    /// Creates the registry over the built-in catalog.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self { sections: &CATALOG };
        debug_assert!(registry.is_acyclic(), "section catalog has a dependency cycle");
        registry
    }

    /// Every section in declaration order.
    #[must_use]
    pub fn all(&self) -> &'static [Section] {
        self.sections
    }

    /// Catalog entry for a section.
    #[must_use]
    pub fn get(&self, name: SectionName) -> &'static Section {
        &self.sections[name.index()]
    }

    /// Returns true if the unwaived dependency graph has no cycle.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        let selected: BTreeSet<_> = SectionName::ALL.into_iter().collect();
        let edges: BTreeMap<_, _> = self
            .sections
            .iter()
            .map(|section| {
                let deps = section
                    .requires
                    .iter()
                    .map(|dep| dep.section)
                    .chain(section.runs_after.iter().copied())
                    .collect::<Vec<_>>();
                (section.name, deps)
            })
            .collect();
        topological_order(&selected, &edges).len() == selected.len()
    }

    /// Resolves a request into an ordered selection.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::UnknownSection` for the first unknown name,
    /// `PlanError::UnsatisfiedDependency` if a hard dependency is disabled,
    /// and `ConfigError::Type` for malformed toggles.
    pub fn resolve(&self, request: &Request, config: &ConfigStore) -> Result<Selection> {
        let requested = Self::requested_names(request)?;
        let mut selection = Selection::default();
        let mut selected = BTreeSet::new();

        for name in requested {
            match self.get(name).disabled_by(config)? {
                Some(reason) => selection.skipped.push(SkippedSection {
                    section: name,
                    reason,
                }),
                None => {
                    selected.insert(name);
                }
            }
        }

        let mut pending: Vec<_> = selected.iter().copied().collect();
        while let Some(name) = pending.pop() {
            for dependency in self.get(name).effective_requires(config) {
                if selected.contains(&dependency) {
                    continue;
                }
                if !self.get(dependency).is_enabled(config)? {
                    return Err(PlanError::UnsatisfiedDependency {
                        section: name,
                        dependency,
                    }
                    .into());
                }
                debug!("{dependency} added as a dependency of {name}");
                selected.insert(dependency);
                selection.implied.push(dependency);
                pending.push(dependency);
            }
        }
        selection.implied.sort_unstable();
        selection.skipped.retain(|skip| !selected.contains(&skip.section));

        for &name in &selected {
            let section = self.get(name);
            let deps = section
                .effective_requires(config)
                .into_iter()
                .chain(section.runs_after.iter().copied())
                .filter(|dep| selected.contains(dep))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            selection.depends_on.insert(name, deps);
        }

        selection.order = topological_order(&selected, &selection.depends_on);
        debug_assert_eq!(selection.order.len(), selected.len());
        Ok(selection)
    }

    fn requested_names(request: &Request) -> Result<Vec<SectionName>> {
        match request {
            Request::All => Ok(SectionName::ALL.to_vec()),
            Request::Only(names) => {
                let mut parsed = BTreeSet::new();
                for raw in names.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
                    let name = raw.parse::<SectionName>().map_err(|name| {
                        PlanError::UnknownSection {
                            name,
                            valid: SectionName::valid_names(),
                        }
                    })?;
                    parsed.insert(name);
                }
                Ok(parsed.into_iter().collect())
            }
        }
    }
}

/// Kahn's algorithm; among ready sections the lowest catalog index goes
/// first. Sections on a cycle are left out of the result.
fn topological_order(
    selected: &BTreeSet<SectionName>,
    depends_on: &BTreeMap<SectionName, Vec<SectionName>>,
) -> Vec<SectionName> {
    let mut in_degree: BTreeMap<SectionName, usize> =
        selected.iter().map(|&name| (name, 0)).collect();
    let mut dependents: BTreeMap<SectionName, Vec<SectionName>> = BTreeMap::new();

    for &name in selected {
        for dep in depends_on.get(&name).into_iter().flatten() {
            if selected.contains(dep) {
                dependents.entry(*dep).or_default().push(name);
                *in_degree.entry(name).or_default() += 1;
            }
        }
    }

    let mut ready: BTreeSet<SectionName> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(selected.len());

    while let Some(name) = ready.pop_first() {
        order.push(name);
        for dependent in dependents.get(&name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    order
}
