//! CLI subcommands.

pub mod route;
pub mod run;
pub mod status;
pub mod validate;
