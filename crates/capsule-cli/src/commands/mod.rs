//! CLI command implementations.

pub mod build;
pub mod bundle;
pub mod info;
pub mod run;
