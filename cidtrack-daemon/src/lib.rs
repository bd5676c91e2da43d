//! cidtrack daemon library.
//!
//! Exposes the binary's modules for integration tests.

pub mod cli;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod settings;
