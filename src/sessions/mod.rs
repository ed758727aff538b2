//! Claude Code session store
//!
//! `store` reads the on-disk session manifests and logs; `watcher` turns
//! filesystem activity into debounced, full-snapshot change events.

pub mod store;
pub mod watcher;

pub use store::{ClaudeProject, ClaudeSession, SessionSummary};
pub use watcher::{ListenerId, SessionChangeEvent, SessionChangeType, SessionsWatcher};
