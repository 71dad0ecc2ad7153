//! Host binary: command line, configuration and process lifecycle
//!
//! Runs an in-memory broker together with a client built from a
//! [`HostConfig`](crate::config::HostConfig) until a shutdown signal arrives.

pub mod args;
mod publisher;
pub mod startup;

pub use args::Args;
pub use startup::startup;
