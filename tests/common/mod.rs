//! Common test utilities and helpers
//!
//! Shared fixtures for the client integration tests: broker setup, handlers
//! that record what they see, and polling with a deadline.

pub mod client_helpers;
