//! Configuration module for the deployment orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `.env.infra`, `.env.secrets` and `.env.services`
//! - The flat, namespaced store with typed accessors
//! - The key catalog and run-level settings
//! - Validation of configuration values
//! - Digests for secret comparison and plan fingerprints

mod hash;
pub mod keys;
mod parser;
mod store;
mod validator;

pub use hash::ConfigHasher;
pub use keys::{BuildMode, ProgressSettings, RuntimeSettings, SpinnerStyle};
pub use parser::{ConfigLoader, EnvEntry, parse_env};
pub use store::{ConfigStore, ConfigValue, MASK, MIN_SECRET_LEN, Namespace, Origin, parse_duration, split_list};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, is_valid_name};
