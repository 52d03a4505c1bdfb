//! Page-level composition for the claw console.
//!
//! Provides:
//! - [`ResourcePoller`]: periodic list refresh with a valid selection
//! - [`LogPanel`], [`ShellPanel`], [`ChatPanel`]: live views of one resource
//! - [`AgentConsole`]: tabs over those panels, following the selection

pub mod chat;
pub mod console;
pub mod log_panel;
pub mod poller;
pub mod shell;

pub use chat::ChatPanel;
pub use console::{AgentConsole, ConsoleIssuers, Tab};
pub use log_panel::LogPanel;
pub use poller::{MIN_POLL_PERIOD, ResourcePoller, Snapshot};
pub use shell::ShellPanel;
