use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coordination::ShutdownToken;
use crate::error::MonitorError;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub portal: PortalConfig,
    #[serde(default)]
    pub watchdog: WatchdogSettings,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// What a dropped portal stream means for bridges still inside their window
    #[serde(default)]
    pub connection_loss_policy: ConnectionLossPolicy,
    /// Repeat the login handshake before every reconnect
    #[serde(default)]
    pub reauth_on_reconnect: bool,
    /// How often the config file is checked for changes
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

fn default_reload_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// Portal host, e.g. "portal.continuumbridge.com"
    #[serde(default = "default_portal_address")]
    pub address: String,
    /// Client key presented at login
    #[serde(default)]
    pub credential: String,
    /// Login endpoint (derived from `address` when unset)
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Stream endpoint (derived from `address` when unset)
    #[serde(default)]
    pub ws_url: Option<String>,
}

fn default_portal_address() -> String {
    "portal.continuumbridge.com".to_string()
}

impl PortalConfig {
    pub fn auth_url(&self) -> String {
        self.auth_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/api/client/v1/client_auth/login/", self.address))
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| format!("ws://{}:7522/", self.address))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    /// Silence after which a bridge is considered down (default: 61 min)
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,
    /// Interval between registry scans (default: 30s)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_liveness_window() -> u64 {
    60 * 61
}

fn default_check_interval() -> u64 {
    30
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            liveness_window_secs: default_liveness_window(),
            check_interval_secs: default_check_interval(),
        }
    }
}

/// Longest accepted liveness window (one year)
pub const MAX_LIVENESS_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted scan period (one day)
pub const MAX_CHECK_INTERVAL_SECS: u64 = 24 * 60 * 60;

impl WatchdogSettings {
    /// Window as a signed duration, `None` if it does not fit
    pub fn liveness_window(&self) -> Option<chrono::Duration> {
        i64::try_from(self.liveness_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Growth factor applied per failed attempt
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Consecutive failures tolerated before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fractional jitter applied to every delay (0.0 disables)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_factor() -> f64 {
    std::f64::consts::E
}

fn default_max_delay() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    200
}

fn default_jitter() -> f64 {
    0.119626565582
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            factor: default_factor(),
            max_delay_secs: default_max_delay(),
            max_retries: default_max_retries(),
            jitter: default_jitter(),
        }
    }
}

/// Operator channel addresses; each is optional
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    /// Comma-separated e-mail recipients
    #[serde(default)]
    pub email: Option<String>,
    /// Comma-separated phone numbers
    #[serde(default)]
    pub sms: Option<String>,
    /// Chat bot webhook URL
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Time-series store base URL, ending in `/`
    pub url: String,
    #[serde(default = "default_metrics_database")]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Per-bridge database overrides keyed by bridge identity
    #[serde(default)]
    pub databases: HashMap<String, String>,
}

fn default_metrics_database() -> String {
    "Bridges".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "warn,bridge_monitor=debug"
    #[serde(default)]
    pub level: Option<String>,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

/// Filter used when neither `RUST_LOG` nor `logging.level` is set
pub const DEFAULT_LOG_FILTER: &str = "info,bridge_monitor=debug";

impl LoggingConfig {
    pub fn filter_directive(&self) -> &str {
        self.level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LOG_FILTER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionLossPolicy {
    /// Bridges keep their own windows; only the watchdog flips them
    #[default]
    Ignore,
    /// Flip every active bridge inactive and alert when the stream drops
    MarkInactive,
}

impl MonitorConfig {
    /// Load configuration from a file and environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let builder = Config::builder()
            .set_default("logging.json", false)?
            .set_default("portal.address", default_portal_address())?
            .add_source(File::from(path).format(file_format(path)).required(false))
            // Override with environment variables (BRIDGE_MONITOR__PORTAL__CREDENTIAL, etc.)
            .add_source(
                Environment::with_prefix("BRIDGE_MONITOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load, then reject the result unless it validates
    pub fn load_validated<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(MonitorError::InvalidConfig)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.portal.credential.trim().is_empty() {
            errors.push("portal.credential must be set".to_string());
        }

        if let Err(e) = url::Url::parse(&self.portal.ws_url()) {
            errors.push(format!("portal.ws_url is not a valid URL: {e}"));
        }

        if let Err(e) = url::Url::parse(&self.portal.auth_url()) {
            errors.push(format!("portal.auth_url is not a valid URL: {e}"));
        }

        if self.watchdog.liveness_window_secs == 0 {
            errors.push("watchdog.liveness_window_secs must be positive".to_string());
        } else if self.watchdog.liveness_window_secs > MAX_LIVENESS_WINDOW_SECS {
            errors.push(format!(
                "watchdog.liveness_window_secs must be at most {MAX_LIVENESS_WINDOW_SECS}"
            ));
        }

        if self.watchdog.check_interval_secs == 0 {
            errors.push("watchdog.check_interval_secs must be positive".to_string());
        } else if self.watchdog.check_interval_secs > MAX_CHECK_INTERVAL_SECS {
            errors.push(format!(
                "watchdog.check_interval_secs must be at most {MAX_CHECK_INTERVAL_SECS}"
            ));
        }

        if self.reconnect.factor < 1.0 {
            errors.push("reconnect.factor must be at least 1.0".to_string());
        }

        if !(0.0..1.0).contains(&self.reconnect.jitter) {
            errors.push("reconnect.jitter must be in [0, 1)".to_string());
        }

        if self.notify.email.is_some() && self.smtp.is_none() {
            errors.push("notify.email is set but [smtp] is missing".to_string());
        }

        if self.notify.sms.is_some() && self.twilio.is_none() {
            errors.push("notify.sms is set but [twilio] is missing".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Human readable summary for startup logs (no secrets)
    pub fn summary(&self) -> String {
        format!(
            "portal={} window={}s interval={}s max_retries={} email={} sms={} webhook={} metrics={} loss_policy={:?} reauth={}",
            self.portal.address,
            self.watchdog.liveness_window_secs,
            self.watchdog.check_interval_secs,
            self.reconnect.max_retries,
            self.notify.email.is_some(),
            self.notify.sms.is_some(),
            self.notify.webhook_url.is_some(),
            self.metrics.is_some(),
            self.connection_loss_policy,
            self.reauth_on_reconnect,
        )
    }
}

/// Read side of the live configuration.
///
/// Each call to [`ConfigHandle::current`] yields an immutable snapshot; a reload
/// swaps the whole snapshot and never mutates one in place.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    rx: watch::Receiver<Arc<MonitorConfig>>,
}

impl ConfigHandle {
    /// Handle over a fixed snapshot, plus the sender used to publish replacements
    pub fn new(config: MonitorConfig) -> (watch::Sender<Arc<MonitorConfig>>, Self) {
        let (tx, rx) = watch::channel(Arc::new(config));
        (tx, Self { rx })
    }

    pub fn current(&self) -> Arc<MonitorConfig> {
        self.rx.borrow().clone()
    }
}

/// Re-reads the config file when it changes and publishes validated snapshots
pub struct ConfigWatcher {
    path: PathBuf,
    tx: watch::Sender<Arc<MonitorConfig>>,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, tx: watch::Sender<Arc<MonitorConfig>>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            tx,
            last_modified,
        }
    }

    /// Reload if the file changed since the last check.
    ///
    /// Returns true when a new snapshot was published.
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        self.last_modified = current;

        match MonitorConfig::load_from(&self.path) {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    info!("Reloaded configuration from {}", self.path.display());
                    debug!("Configuration: {}", config.summary());
                    self.tx.send_replace(Arc::new(config));
                    true
                }
                Err(errors) => {
                    warn!(
                        "Ignoring invalid configuration in {}: {}",
                        self.path.display(),
                        errors.join("; ")
                    );
                    false
                }
            },
            Err(e) => {
                warn!("Problem reading {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Poll on the configured interval until shutdown
    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        loop {
            let interval = Duration::from_secs(self.tx.borrow().reload_interval_secs.max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.poll();
                }
                _ = shutdown.cancelled() => {
                    debug!("Config watcher stopped");
                    return;
                }
            }
        }
    }
}

/// Format from the file extension; the legacy `.config` layout is JSON
fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Json,
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
pub(crate) fn test_config() -> MonitorConfig {
    MonitorConfig {
        portal: PortalConfig {
            address: "portal.example.com".to_string(),
            credential: "secret-key".to_string(),
            auth_url: None,
            ws_url: None,
        },
        watchdog: WatchdogSettings::default(),
        reconnect: ReconnectSettings::default(),
        notify: NotifyConfig::default(),
        smtp: None,
        twilio: None,
        metrics: None,
        logging: LoggingConfig::default(),
        connection_loss_policy: ConnectionLossPolicy::Ignore,
        reauth_on_reconnect: false,
        reload_interval_secs: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "bridge-monitor-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_derived_endpoints() {
        let config = test_config();
        assert_eq!(
            config.portal.auth_url(),
            "http://portal.example.com/api/client/v1/client_auth/login/"
        );
        assert_eq!(config.portal.ws_url(), "ws://portal.example.com:7522/");
    }

    #[test]
    fn test_load_applies_defaults() {
        let path = temp_config(
            "defaults",
            r#"
            [portal]
            credential = "abc"

            [watchdog]
            liveness_window_secs = 100
            "#,
        );
        let config = MonitorConfig::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.portal.address, "portal.continuumbridge.com");
        assert_eq!(config.watchdog.liveness_window_secs, 100);
        assert_eq!(config.watchdog.check_interval_secs, 30);
        assert_eq!(config.reconnect.max_retries, 200);
        assert_eq!(config.reconnect.max_delay_secs, 60);
        assert_eq!(config.connection_loss_policy, ConnectionLossPolicy::Ignore);
        assert!(!config.reauth_on_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_config_extension_read_as_json() {
        let path = std::env::temp_dir().join(format!(
            "bridge_monitor-{}.config",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"portal": {"credential": "abc"}, "notify": {"webhook_url": "http://hook"}}"#,
        )
        .unwrap();
        let config = MonitorConfig::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.portal.credential, "abc");
        assert_eq!(config.notify.webhook_url.as_deref(), Some("http://hook"));
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = test_config();
        config.portal.credential = String::new();
        config.watchdog.check_interval_secs = 0;
        config.notify.email = Some("ops@example.com".to_string());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_validate_bounds_watchdog_settings() {
        let mut config = test_config();
        config.watchdog.liveness_window_secs = 10_000_000_000_000_000;
        config.watchdog.check_interval_secs = MAX_CHECK_INTERVAL_SECS + 1;
        assert_eq!(config.watchdog.liveness_window(), None);

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("watchdog.liveness_window_secs must be at most"));
        assert!(errors[1].starts_with("watchdog.check_interval_secs must be at most"));

        config.watchdog.liveness_window_secs = MAX_LIVENESS_WINDOW_SECS;
        config.watchdog.check_interval_secs = MAX_CHECK_INTERVAL_SECS;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.watchdog.liveness_window(),
            Some(chrono::Duration::seconds(MAX_LIVENESS_WINDOW_SECS as i64))
        );
    }

    #[test]
    fn test_log_filter_only_defaults_when_unset() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.filter_directive(), DEFAULT_LOG_FILTER);

        logging.level = Some("info".to_string());
        assert_eq!(logging.filter_directive(), "info");

        logging.level = Some("  ".to_string());
        assert_eq!(logging.filter_directive(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_load_validated_rejects_invalid_file() {
        let path = temp_config("invalid", "[watchdog]\nliveness_window_secs = 0\n");
        let err = MonitorConfig::load_validated(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        match err {
            MonitorError::InvalidConfig(errors) => {
                assert!(errors.contains(&"portal.credential must be set".to_string()));
                assert!(errors
                    .contains(&"watchdog.liveness_window_secs must be positive".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_watcher_keeps_snapshot_on_bad_file() {
        let path = temp_config("watcher", "[portal]\ncredential = \"abc\"\n");
        let (tx, handle) = ConfigHandle::new(MonitorConfig::load_from(&path).unwrap());
        let mut watcher = ConfigWatcher::new(&path, tx);

        // Unchanged file: nothing published
        assert!(!watcher.poll());

        // Force a different mtime so the change is seen even on coarse clocks
        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
        std::fs::write(&path, "[portal]\ncredential = \"\"\n").unwrap();
        assert!(!watcher.poll());
        assert_eq!(handle.current().portal.credential, "abc");

        watcher.last_modified = Some(SystemTime::UNIX_EPOCH);
        std::fs::write(
            &path,
            "[portal]\ncredential = \"abc\"\n[watchdog]\nliveness_window_secs = 42\n",
        )
        .unwrap();
        assert!(watcher.poll());
        assert_eq!(handle.current().watchdog.liveness_window_secs, 42);

        std::fs::remove_file(&path).ok();
    }
}
