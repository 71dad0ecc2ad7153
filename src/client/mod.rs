//! Client runtime: connections, producers, consumers and their orchestration
//!
//! # Architecture
//!
//! ```text
//!                         ┌───────────────────────── Client ─────────────────────────┐
//!                         │                                                          │
//! ClientBuilder ──build──►│ ClientOrchestrator                                       │
//!                         │   start: producers ─► topology ─► consumers              │
//!                         │   stop:  consumers                                       │
//!                         │                                                          │
//!                         │ ProducerHandle ─────┐                                    │
//!                         │ TopologyReconciler ─┼──► ConnectionHandle (per name)     │
//!                         │ ConsumerRuntime ────┘     └─ SharedAsyncInit<Connection> │
//!                         │                                                          │
//!                         └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every component registered under a connection name shares one
//! [`ConnectionHandle`], so the first of them to need the connection
//! establishes it and all others reuse it.
//!
//! # Failure model
//!
//! - Connection, topology and producer failures abort [`Client::start`].
//! - Handler failures are logged and the receive loop carries on.
//! - Cancellation is reported as [`ClientError::Cancelled`], never as a failure
//!   of the operation that was interrupted.

pub mod api;
mod builder;
mod connection;
mod consumer;
mod error;
mod observers;
mod options;
mod orchestrator;
mod producer;
mod runtime;
mod services;
mod topology;

#[cfg(test)]
mod tests;

pub use api::*;
