// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # deploy-gcp
//!
//! A declarative, idempotent deployment orchestrator for an application
//! stack on Google Cloud: a Cloud Run backend and ETL job, BigQuery, Cloud
//! SQL, Cloud Storage, Secret Manager, and a frontend served from Firebase
//! Hosting or Cloud Run.
//!
//! ## Overview
//!
//! Configuration lives in three env files in the run root:
//!
//! - `.env.infra`: project, region, section toggles and run settings
//! - `.env.secrets`: values uploaded to Secret Manager, never printed
//! - `.env.services`: per-service settings
//!
//! Every run compares the desired state derived from those files with the
//! live state of each section and applies only the difference.
//!
//! ## Architecture
//!
//! 1. **Selection**: [`sections`] resolves the requested sections, their
//!    dependencies and the execution order
//! 2. **Inspection**: each section's [`driver`] reads the remote state
//! 3. **Planning**: the [`planner`] classifies every section as create,
//!    update, no change, skip or inspection failure
//! 4. **Execution**: the executor reconciles changed sections in order,
//!    passing outputs such as the backend URL downstream
//!
//! ## Modules
//!
//! - [`config`]: Env-file loading, key catalog and validation
//! - [`sections`]: Section catalog and dependency resolution
//! - [`driver`]: Resource drivers over `gcloud`, `bq`, `docker` and `firebase`
//! - [`planner`]: Diffing, planning and execution
//! - [`preflight`]: Read-only checks behind `deploy-gcp check`
//! - [`scaffold`]: Example files behind `deploy-gcp init`
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```text
//! # .env.infra
//! GCP_PROJECT_ID=my-gcp-project
//! GCP_REGION=asia-northeast3
//! DEPLOY_SERVICE_ACCOUNT_EMAIL=deployer@my-gcp-project.iam.gserviceaccount.com
//! ARTIFACT_REGISTRY_REPO=apps
//! ENABLE_BIGQUERY=true
//! BIGQUERY_DATASET_ID=analytics
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod planner;
pub mod preflight;
pub mod scaffold;
pub mod sections;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigLoader, ConfigStore, ConfigValidator, RuntimeSettings};
pub use driver::{DriverSet, ProcessRunner, ResourceDriver};
pub use error::{DeployError, Result};
pub use planner::{CancelHandle, CancelSignal, ExecuteOptions, Executor, Plan, Planner, Report};
pub use preflight::{CheckReport, Preflight};
pub use sections::{Request, SectionName, SectionRegistry};
