//! page-sync library: the production collaborators behind the CLI.
//!
//! This is a thin library layer over the binary's components,
//! allowing integration tests to access them.

pub mod config;
pub mod confluence;
pub mod mermaid;
pub mod native_fs;
pub mod report;

pub use config::{Config, ConfigError};
pub use confluence::ConfluenceClient;
pub use mermaid::MermaidCli;
pub use native_fs::NativeFs;
