//! Supervision layer for bridge liveness
//!
//! - Watchdog that flips silent bridges inactive
//! - Alert dispatch to operator notifiers

pub mod alert_manager;
pub mod watchdog;

pub use alert_manager::{AlertDispatcher, Notifier, NotifierKind};
pub use watchdog::Watchdog;
