//! revive monitor library.
//!
//! This crate primarily ships the `revive-monitor` binary, but we expose a
//! small library surface to enable integration testing and reuse.

pub mod config;
pub mod monitor;
