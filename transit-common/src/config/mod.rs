//! Configuration helpers shared by every binary in the workspace.
//!
//! - [`env`]: `${VAR}` / `${VAR:default}` templating applied to the raw
//!   configuration text before it is parsed

pub mod env;

pub use env::{substitute, substitute_env};
