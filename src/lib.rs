//! Library entrypoint for notekeeper-cli.
//!
//! The primary interface is the `notekeeper` binary. This lib target exposes
//! the notes cache and command layer to the binary and to integration tests.

pub mod cache;
pub mod commands;
pub mod config;
pub mod correlate;
pub mod detail;
pub mod error;
pub mod git;
pub mod model;
pub mod output;
pub mod scm_url;
