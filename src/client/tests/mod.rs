//! Test modules for the client runtime
//!
//! Organised by component; all of them run against the in-memory broker.

mod support;
