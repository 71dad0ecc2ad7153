pub mod broker;
pub mod client;
pub mod config;
pub mod core;
pub mod host;
