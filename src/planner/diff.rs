//! Diff engine for comparing desired vs observed attributes.
//!
//! Only attributes the desired state names are compared; extra remote
//! attributes are not drift. Secrets are compared against remote digests.

use serde::Serialize;

use crate::config::ConfigHasher;
use crate::driver::{Attribute, Attributes, DesiredState};

/// Engine for computing attribute diffs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine {
    /// Hasher used to digest secret values.
    hasher: ConfigHasher,
}

/// A single differing attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Attribute name.
    pub field: String,
    /// Observed value, `None` if the attribute is absent remotely.
    pub old: Option<Attribute>,
    /// Desired value.
    pub new: Option<Attribute>,
}

impl DiffDetail {
    /// Returns true if either side must be masked.
    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        self.old.as_ref().is_some_and(Attribute::is_sensitive)
            || self.new.as_ref().is_some_and(Attribute::is_sensitive)
    }
}

/// Serializable view of a [`DiffDetail`] with sensitive values masked.
#[derive(Debug, Clone, Serialize)]
pub struct DiffView {
    /// Attribute name.
    pub field: String,
    /// Rendered observed value.
    pub old: Option<String>,
    /// Rendered desired value.
    pub new: Option<String>,
}

impl From<&DiffDetail> for DiffView {
    fn from(detail: &DiffDetail) -> Self {
        Self {
            field: detail.field.clone(),
            old: detail.old.as_ref().map(ToString::to_string),
            new: detail.new.as_ref().map(ToString::to_string),
        }
    }
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Attributes of `desired` that `observed` does not match, in name
    /// order. Unresolved output references always count as a change.
    #[must_use]
    pub fn diff(&self, desired: &DesiredState, observed: &Attributes) -> Vec<DiffDetail> {
        desired
            .attributes
            .iter()
            .filter_map(|(field, wanted)| {
                let current = observed.get(field);
                if current.is_some_and(|current| self.matches(wanted, current)) {
                    return None;
                }
                Some(DiffDetail {
                    field: field.clone(),
                    old: current.cloned(),
                    new: Some(wanted.clone()),
                })
            })
            .collect()
    }

    /// Stable text for fingerprinting a desired attribute. Secrets are
    /// digested.
    #[must_use]
    pub fn fingerprint_value(&self, attribute: &Attribute) -> String {
        match attribute {
            Attribute::Plain(value) => format!("plain:{value}"),
            Attribute::Secret(value) => format!("digest:{}", self.hasher.digest(value)),
            Attribute::Digest(digest) => format!("digest:{digest}"),
            Attribute::Output(reference) => format!("output:{reference}"),
        }
    }

    fn matches(&self, desired: &Attribute, observed: &Attribute) -> bool {
        match (desired, observed) {
            (Attribute::Plain(a), Attribute::Plain(b)) | (Attribute::Secret(a), Attribute::Secret(b)) => {
                a == b
            }
            (Attribute::Secret(value), Attribute::Digest(digest)) => {
                self.hasher.digest(value) == *digest
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_desired_fields_are_compared() {
        let engine = DiffEngine::new();
        let desired = DesiredState::new("svc").with_plain("image", "api:v1");
        let observed = Attributes::from([
            (String::from("image"), Attribute::plain("api:v1")),
            (String::from("env.EXTRA"), Attribute::plain("1")),
        ]);
        assert!(engine.diff(&desired, &observed).is_empty());
    }

    #[test]
    fn test_changed_and_missing_fields() {
        let engine = DiffEngine::new();
        let desired = DesiredState::new("svc")
            .with_plain("image", "api:v2")
            .with_plain("service_account", "sa@p.iam.gserviceaccount.com");
        let observed = Attributes::from([(String::from("image"), Attribute::plain("api:v1"))]);

        let diff = engine.diff(&desired, &observed);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].field, "image");
        assert_eq!(diff[0].old, Some(Attribute::plain("api:v1")));
        assert_eq!(diff[1].field, "service_account");
        assert_eq!(diff[1].old, None);
    }

    #[test]
    fn test_secret_compared_by_digest() {
        let engine = DiffEngine::new();
        let hasher = ConfigHasher::new();
        let desired = DesiredState::new("secrets").with("DB_PASSWORD", Attribute::Secret(String::from("hunter22")));

        let same = Attributes::from([(String::from("DB_PASSWORD"), Attribute::Digest(hasher.digest("hunter22")))]);
        assert!(engine.diff(&desired, &same).is_empty());

        let other = Attributes::from([(String::from("DB_PASSWORD"), Attribute::Digest(hasher.digest("old")))]);
        let diff = engine.diff(&desired, &other);
        assert_eq!(diff.len(), 1);
        assert!(diff[0].is_sensitive());
        let view = DiffView::from(&diff[0]);
        assert_eq!(view.new.as_deref(), Some(crate::config::MASK));
    }

    #[test]
    fn test_unresolved_output_is_a_change() {
        let engine = DiffEngine::new();
        let desired = DesiredState::new("frontend").with("api_url", Attribute::Output(String::from("backend.url")));
        let observed = Attributes::from([(String::from("api_url"), Attribute::plain("https://old.run.app"))]);
        assert_eq!(engine.diff(&desired, &observed).len(), 1);
    }
}
