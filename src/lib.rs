//! Helm - control plane for local coding-agent processes
//!
//! This library crate exposes internal modules for integration testing.

pub mod config;
pub mod data;
pub mod discovery;
pub mod sessions;
pub mod terminal;
pub mod util;
