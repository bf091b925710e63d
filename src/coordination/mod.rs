//! Coordination layer for process lifetime
//!
//! - Shutdown coordinator and tokens
//! - OS signal wiring

pub mod shutdown;

pub use shutdown::{install_signal_handlers, Shutdown, ShutdownSignal, ShutdownToken};
