//! CLI module - argument parsing and config overrides

mod args;

pub use args::{Cli, Commands};
