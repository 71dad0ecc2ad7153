//! Client Integration Test Modules

pub mod connection;
pub mod delivery;
pub mod lifecycle;
pub mod topology;
