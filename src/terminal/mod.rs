//! PTY-backed terminal sessions

pub mod buffer;
pub mod manager;
pub mod pty;
pub mod shell;

pub use manager::{Subscription, TerminalManager, TerminalSession, TerminalSummary};
pub use pty::{EventSink, ExitInfo, NativePtySpawner, PtyEvent, PtyProcess, PtySpawner, SpawnRequest};
