//! Privileged shell integration module
//!
//! Owns the elevated execution conduit: the opener abstraction, the channel
//! and its line protocol, and the mock shell used by tests and the demo.

pub mod channel;
pub mod demo;
pub mod mock;
pub mod opener;
pub mod types;

// Re-export commonly used types
pub use channel::ElevatedChannel;
pub use mock::{MockBehavior, MockOpener};
pub use opener::{ShellOpener, ShellProcess, SuOpener};
pub use types::*;
