//! Concierge Agent Service
//!
//! Configuration and the console transport for running a grounded voice
//! session locally. The `agent` binary is a thin wrapper around this library.

pub mod config;
pub mod console;
