//! Configuration loading for the orchestration core.
//!
//! `$include: <relative path>` directives and `${ENV_VAR:default}` expansion, resolved and
//! deep-merged over compiled-in defaults (see [`crate::agent_config::Config`]).

pub mod loader;

pub use loader::{deep_merge, load_yaml_config, load_yaml_file};
