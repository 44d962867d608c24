//! Command-line interface: argument parsing and rendering.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, SelectionArgs};
pub use output::{Detail, OutputFormatter};
