//! Env-file parsing and layered loading.
//!
//! The three configuration files are read from a run root in a fixed order
//! (infra, secrets, services). The first file defining a key wins; the
//! process environment may then override keys the tool knows about.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};

use super::keys;
use super::store::{ConfigStore, Namespace, Origin};

/// A single `KEY=VALUE` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    /// Trimmed key.
    pub key: String,
    /// Value after trimming and quote stripping.
    pub value: String,
    /// One-based line number.
    pub line: usize,
}

/// Parses env-file content.
///
/// Blank lines and `#` comments are ignored. Values are verbatim: no
/// interpolation and no multi-line values.
///
/// # Errors
///
/// Returns `ConfigError::Parse` naming the file and line for a line without
/// `=` or with an empty key.
pub fn parse_env(content: &str, path: &Path) -> ConfigResult<Vec<EnvEntry>> {
    let mut entries = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parse_error = |message: &str| ConfigError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            message: message.to_string(),
        };

        let Some((key, value)) = line.split_once('=') else {
            return Err(parse_error("expected KEY=VALUE"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(parse_error("empty key"));
        }

        entries.push(EnvEntry {
            key: key.to_string(),
            value: strip_quotes(value.trim()).to_string(),
            line: index + 1,
        });
    }

    Ok(entries)
}

/// Removes one pair of matching surrounding quotes.
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Loader for the layered configuration files of a run root.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Run root containing the env files.
    root: PathBuf,
    /// Injected environment; `None` reads the process environment.
    environment: Option<Vec<(String, String)>>,
}

impl ConfigLoader {
    /// Creates a loader for the given run root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            environment: None,
        }
    }

    /// Uses the given variables instead of the process environment.
    #[must_use]
    pub fn with_environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Loads `.env.infra`, `.env.secrets` and `.env.services`, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a present file cannot be read and
    /// `ConfigError::Parse` for a malformed line.
    pub fn load(self) -> ConfigResult<ConfigStore> {
        let mut store = ConfigStore::new(&self.root);

        for namespace in Namespace::FILES {
            let Some(name) = namespace.file_name() else {
                continue;
            };
            let path = self.root.join(name);
            Self::load_file(&mut store, &path, namespace)?;
        }

        let environment = self
            .environment
            .unwrap_or_else(|| std::env::vars().collect());
        Self::apply_environment(&mut store, environment);

        debug!("Loaded {} configuration keys", store.len());
        Ok(store)
    }

    fn load_file(store: &mut ConfigStore, path: &Path, namespace: Namespace) -> ConfigResult<()> {
        if !path.exists() {
            debug!("{} not found, skipping", path.display());
            return Ok(());
        }

        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        for entry in parse_env(&content, path)? {
            if let Some(existing) = store.get(&entry.key) {
                warn!(
                    "{} defined in {} is shadowed by {} and ignored",
                    entry.key,
                    path.display(),
                    existing.origin
                );
                continue;
            }
            store.insert(entry.key, entry.value, namespace, Origin::File(path.to_path_buf()));
        }

        Ok(())
    }

    /// Process environment overrides file values for keys that are defined in
    /// a file or listed in the key catalog. Overridden keys keep their file
    /// namespace.
    fn apply_environment(store: &mut ConfigStore, environment: Vec<(String, String)>) {
        for (key, value) in environment {
            if store.override_value(&key, value.clone(), Origin::Environment) {
                debug!("{key} overridden from the process environment");
            } else if keys::is_known(&key) {
                store.insert(key, value, Namespace::Environment, Origin::Environment);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_parse_quotes_and_comments() {
        let content = "# comment\n\nA=1\n  B = \"two words\" \nC='x=y'\nD=\"unbalanced'\nE=\n";
        let entries = parse_env(content, Path::new(".env.infra")).unwrap();
        let pairs: Vec<_> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("A", "1"),
                ("B", "two words"),
                ("C", "x=y"),
                ("D", "\"unbalanced'"),
                ("E", ""),
            ]
        );
        assert_eq!(entries[1].line, 4);
    }

    #[test]
    fn test_parse_no_interpolation() {
        let entries = parse_env("URL=${HOST}/api", Path::new("f")).unwrap();
        assert_eq!(entries[0].value, "${HOST}/api");
    }

    #[test]
    fn test_parse_missing_equals_names_line() {
        let err = parse_env("A=1\nNOT_A_PAIR\n", Path::new(".env.services")).unwrap_err();
        match err {
            ConfigError::Parse { path, line, .. } => {
                assert_eq!(path, PathBuf::from(".env.services"));
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_files_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfigLoader::new(dir.path())
            .with_environment(no_env())
            .load()
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_first_file_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env.infra"), "KEY=A\nGCP_REGION=asia-northeast3\n").unwrap();
        fs::write(dir.path().join(".env.services"), "KEY=B\nBACKEND_IMAGE_NAME=api\n").unwrap();

        let store = ConfigLoader::new(dir.path())
            .with_environment(no_env())
            .load()
            .unwrap();
        assert_eq!(store.get_string("KEY", ""), "A");
        assert_eq!(store.get_string("BACKEND_IMAGE_NAME", ""), "api");
        assert_eq!(store.get("KEY").map(|v| v.namespace), Some(Namespace::Infra));
    }

    #[test]
    fn test_load_secrets_beat_services() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env.secrets"), "DB_PASSWORD=s3cret\n").unwrap();
        fs::write(dir.path().join(".env.services"), "DB_PASSWORD=plain\n").unwrap();

        let store = ConfigLoader::new(dir.path())
            .with_environment(no_env())
            .load()
            .unwrap();
        assert_eq!(store.get_string("DB_PASSWORD", ""), "s3cret");
        assert!(store.is_secret("DB_PASSWORD"));
    }

    #[test]
    fn test_environment_overrides_known_and_file_keys_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env.infra"), "GCP_REGION=us-central1\nCUSTOM=file\n").unwrap();
        fs::write(dir.path().join(".env.secrets"), "API_TOKEN=from-file\n").unwrap();

        let store = ConfigLoader::new(dir.path())
            .with_environment([
                ("GCP_REGION", "europe-west1"),
                ("CUSTOM", "env"),
                ("API_TOKEN", "from-env"),
                ("GCP_PROJECT_ID", "env-project"),
                ("HOME", "/home/someone"),
            ])
            .load()
            .unwrap();

        assert_eq!(store.get_string("GCP_REGION", ""), "europe-west1");
        assert_eq!(store.get_string("CUSTOM", ""), "env");
        assert_eq!(store.get_string("API_TOKEN", ""), "from-env");
        assert!(store.is_secret("API_TOKEN"));
        assert_eq!(
            store.get("GCP_PROJECT_ID").map(|v| v.namespace),
            Some(Namespace::Environment)
        );
        assert!(store.get("HOME").is_none());
    }

    #[test]
    fn test_unreadable_present_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".env.infra")).unwrap();

        let err = ConfigLoader::new(dir.path())
            .with_environment(no_env())
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn test_parse_error_propagates_from_load() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env.secrets"), "OK=1\n\nbroken line\n").unwrap();

        let err = ConfigLoader::new(dir.path())
            .with_environment(no_env())
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 3, .. }));
    }
}
