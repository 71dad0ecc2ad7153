//! Core services and infrastructure

pub mod cancellation;
pub mod error_handling;
pub mod lazy;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod sync;
