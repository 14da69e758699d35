//! Subcommand implementations.

pub mod certs;
pub mod policy;
pub mod run;
