//! Flat, namespaced configuration store.
//!
//! Values are strings at rest and are coerced on access. The store is
//! read-only once loading has finished.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};

/// Placeholder printed instead of secret values.
pub const MASK: &str = "********";

/// Shortest secret value accepted. Shorter values are not scrubbed from
/// free text, so validation rejects them.
pub const MIN_SECRET_LEN: usize = 4;

/// Which configuration file a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// `.env.infra`: project, region and section toggles.
    Infra,
    /// `.env.secrets`: values uploaded to Secret Manager, never printed.
    Secrets,
    /// `.env.services`: per-service settings.
    Services,
    /// Keys only present in the process environment.
    Environment,
}

impl Namespace {
    /// File-backed namespaces in load order.
    pub const FILES: [Self; 3] = [Self::Infra, Self::Secrets, Self::Services];

    /// Name of the backing file, if any.
    #[must_use]
    pub const fn file_name(self) -> Option<&'static str> {
        match self {
            Self::Infra => Some(".env.infra"),
            Self::Secrets => Some(".env.secrets"),
            Self::Services => Some(".env.services"),
            Self::Environment => None,
        }
    }

    /// Returns true for the namespace whose values must never be echoed.
    #[must_use]
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::Secrets)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infra => write!(f, "infra"),
            Self::Secrets => write!(f, "secrets"),
            Self::Services => write!(f, "services"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// Where a value was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A configuration file.
    File(PathBuf),
    /// The process environment.
    Environment,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Environment => write!(f, "process environment"),
        }
    }
}

/// A resolved configuration entry.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigValue {
    /// Raw value, verbatim after quote stripping.
    pub value: String,
    /// Namespace the key belongs to.
    pub namespace: Namespace,
    /// Where the value came from.
    pub origin: Origin,
}

impl ConfigValue {
    /// Value suitable for printing: masked for secrets.
    #[must_use]
    pub fn display_value(&self) -> &str {
        if self.namespace.is_secret() {
            MASK
        } else {
            &self.value
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValue")
            .field("value", &self.display_value())
            .field("namespace", &self.namespace)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Flat key/value configuration with typed accessors.
///
/// Keys are case-sensitive. An empty value is treated the same as an unset
/// key by every accessor, so `KEY=` in a file falls back to the default.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    root: PathBuf,
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigStore {
    /// Creates an empty store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builds a store from literal entries. First entry for a key wins.
    #[must_use]
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (Namespace, &'a str, &'a str)>,
    ) -> Self {
        let mut store = Self::new(".");
        for (namespace, key, value) in entries {
            let origin = namespace
                .file_name()
                .map_or(Origin::Environment, |name| Origin::File(PathBuf::from(name)));
            store.insert(key, value, namespace, origin);
        }
        store
    }

    /// Inserts a value unless the key is already set. Returns whether the
    /// value was stored.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        namespace: Namespace,
        origin: Origin,
    ) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(
            key,
            ConfigValue {
                value: value.into(),
                namespace,
                origin,
            },
        );
        true
    }

    /// Replaces the value of an existing key, keeping its namespace.
    pub(crate) fn override_value(&mut self, key: &str, value: String, origin: Origin) -> bool {
        match self.values.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.origin = origin;
                true
            }
            None => false,
        }
    }

    /// Directory the configuration files were loaded from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the full entry for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Returns true if the key is set to a non-empty value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get_opt(key).is_some()
    }

    /// Returns the trimmed value if set and non-empty.
    #[must_use]
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|entry| entry.value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns the value or `default`.
    #[must_use]
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_opt(key).unwrap_or(default).to_string()
    }

    /// Returns the value as a boolean.
    ///
    /// Accepts `true/false/1/0/yes/no` in any case.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` for any other value.
    pub fn get_bool(&self, key: &str, default: bool) -> ConfigResult<bool> {
        let Some(raw) = self.get_opt(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(self.type_error(key, "a boolean (true/false/1/0/yes/no)", raw)),
        }
    }

    /// Returns the value as a signed integer.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` if the value is not an integer.
    pub fn get_int(&self, key: &str, default: i64) -> ConfigResult<i64> {
        self.get_opt(key).map_or(Ok(default), |raw| {
            raw.parse()
                .map_err(|_| self.type_error(key, "an integer", raw))
        })
    }

    /// Returns the value as a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` if the value is not a non-negative integer.
    pub fn get_count(&self, key: &str, default: usize) -> ConfigResult<usize> {
        self.get_opt(key).map_or(Ok(default), |raw| {
            raw.parse()
                .map_err(|_| self.type_error(key, "a non-negative integer", raw))
        })
    }

    /// Returns the value as a duration (`250ms`, `30s`, `5m`, `1h`, `1d`, or
    /// a bare number of seconds).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Type` if the value is not a duration.
    pub fn get_duration(&self, key: &str, default: Duration) -> ConfigResult<Duration> {
        self.get_opt(key).map_or(Ok(default), |raw| {
            parse_duration(raw).ok_or_else(|| self.type_error(key, "a duration (e.g. 30s, 5m)", raw))
        })
    }

    /// Splits the value on commas, trimming and dropping empty items.
    #[must_use]
    pub fn get_string_list(&self, key: &str, default: &[&str]) -> Vec<String> {
        self.get_opt(key).map_or_else(
            || default.iter().map(|item| (*item).to_string()).collect(),
            split_list,
        )
    }

    /// Returns true if the key lives in the secrets namespace.
    #[must_use]
    pub fn is_secret(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|entry| entry.namespace.is_secret())
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Iterates over the entries of one namespace in key order.
    pub fn namespace(&self, namespace: Namespace) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.iter().filter(move |(_, value)| value.namespace == namespace)
    }

    /// Raw values of every secret, used to scrub free-text messages.
    #[must_use]
    pub fn secret_values(&self) -> Vec<&str> {
        self.namespace(Namespace::Secrets)
            .map(|(_, value)| value.value.as_str())
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn type_error(&self, key: &str, expected: &'static str, raw: &str) -> ConfigError {
        let value = if self.is_secret(key) {
            MASK.to_string()
        } else {
            raw.to_string()
        };
        ConfigError::Type {
            key: key.to_string(),
            expected,
            value,
        }
    }
}

/// Parses `250ms`, `30s`, `5m`, `1h`, `1d` or a bare number of seconds.
/// Fractions such as `0.12` or `1.5m` are accepted.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    if number.is_empty() {
        return None;
    }
    let millis_per_unit: u64 = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    if let Ok(amount) = number.parse::<u64>() {
        return amount.checked_mul(millis_per_unit).map(Duration::from_millis);
    }
    let amount: f64 = number.parse().ok()?;
    #[allow(clippy::cast_precision_loss)]
    let seconds = amount * millis_per_unit as f64 / 1_000.0;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Splits a comma separated list, trimming items and dropping empty ones.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
