pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod services;
pub mod supervisor;

pub use adapters::{
    Authenticator, ConnectionHandle, ConnectionState, ConnectionSupervisor, Credential,
    PortalAuthenticator, ReconnectPolicy, Session, StreamHandler,
};
pub use config::{ConfigHandle, ConfigWatcher, ConnectionLossPolicy, MonitorConfig};
pub use coordination::{install_signal_handlers, Shutdown, ShutdownSignal, ShutdownToken};
pub use domain::{AlertCause, AlertEvent, BridgeRecord, BridgeRegistry, Envelope, Frame};
pub use error::{MonitorError, Result};
pub use services::{BridgeMonitor, MetricsRecorder, MonitorMetrics};
pub use supervisor::{AlertDispatcher, Notifier, NotifierKind, Watchdog};
