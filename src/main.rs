use anyhow::Context;
use clap::Parser;
use bridge_monitor::adapters::{
    ConnectionSupervisor, Credential, EmailNotifier, InfluxRecorder, PortalAuthenticator,
    ReconnectPolicy, SmsNotifier, WebhookNotifier,
};
use bridge_monitor::cli::{Cli, Commands};
use bridge_monitor::config::{ConfigHandle, ConfigWatcher, LoggingConfig, MonitorConfig};
use bridge_monitor::coordination::{install_signal_handlers, Shutdown, ShutdownSignal};
use bridge_monitor::domain::BridgeRegistry;
use bridge_monitor::error::Result;
use bridge_monitor::services::{BridgeMonitor, MonitorMetrics};
use bridge_monitor::supervisor::{AlertDispatcher, Watchdog};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command() {
        Commands::CheckConfig => check_config(&cli.config),
        Commands::Run => run(&cli.config).await,
    }
}

fn load_config(path: &str) -> Result<MonitorConfig> {
    let config = MonitorConfig::load_validated(path)
        .with_context(|| format!("failed to load config {}", path))?;
    Ok(config)
}

fn check_config(path: &str) -> Result<()> {
    let config = load_config(path)?;
    println!("{}: OK", path);
    println!("{}", config.summary());
    Ok(())
}

async fn run(path: &str) -> Result<()> {
    let config = load_config(path)?;
    let _log_guard = init_logging(&config.logging);

    info!("Starting bridge monitor");
    info!("Configuration: {}", config.summary());

    let shutdown = Arc::new(Shutdown::new());
    install_signal_handlers(shutdown.clone());

    let (config_tx, config_handle) = ConfigHandle::new(config.clone());
    let watcher = tokio::spawn(ConfigWatcher::new(path, config_tx).run(shutdown.token()));

    let metrics = Arc::new(MonitorMetrics::new());
    let registry = BridgeRegistry::new();
    let alerts = build_dispatcher(&config, config_handle.clone())?;

    let authenticator = Arc::new(PortalAuthenticator::from_config(&config.portal)?);
    let supervisor = ConnectionSupervisor::new(
        authenticator,
        Credential::new(config.portal.credential.clone()),
        ReconnectPolicy::from_settings(&config.reconnect),
    )
    .with_reauth_on_reconnect(config.reauth_on_reconnect);

    // A failed first login is fatal; later failures go through the backoff loop
    let session = match supervisor.authenticate().await {
        Ok(session) => session,
        Err(e) => {
            error!("Portal login failed: {}", e);
            shutdown.request_shutdown(ShutdownSignal::Graceful);
            return Err(e.into());
        }
    };

    let mut monitor = BridgeMonitor::new(
        registry.clone(),
        supervisor.handle(),
        alerts.clone(),
        config_handle.clone(),
        metrics.clone(),
    );
    if let Some(metrics_config) = config.metrics.clone() {
        monitor = monitor.with_recorder(Arc::new(InfluxRecorder::new(metrics_config)?));
        info!("Status payloads will be posted to the metrics store");
    }

    let watchdog = Watchdog::new(registry, config_handle, alerts, metrics.clone());
    let watchdog = tokio::spawn(watchdog.run(shutdown.token()));

    let result = supervisor
        .run(session, Arc::new(monitor), shutdown.token())
        .await;

    if let Err(e) = &result {
        error!("Portal supervisor ended: {}", e);
    }

    if !shutdown.is_shutdown_requested() {
        shutdown.request_shutdown(ShutdownSignal::Graceful);
    }
    let drain = shutdown
        .signal()
        .unwrap_or(ShutdownSignal::Graceful)
        .drain_timeout();
    for (name, task) in [("watchdog", watchdog), ("config watcher", watcher)] {
        let Some(limit) = drain else {
            warn!("Urgent shutdown, aborting {}", name);
            task.abort();
            continue;
        };
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} task failed: {}", name, e),
            Err(_) => warn!("{} did not stop within {:?}", name, limit),
        }
    }

    info!("Final counters: {}", metrics.summary());
    info!("Bridge monitor stopped");
    result
}

fn build_dispatcher(config: &MonitorConfig, handle: ConfigHandle) -> Result<AlertDispatcher> {
    let mut alerts = AlertDispatcher::new(handle);

    if let Some(smtp) = &config.smtp {
        alerts = alerts.with_notifier(Arc::new(EmailNotifier::new(smtp)?));
        info!("E-mail alerts enabled via {}:{}", smtp.host, smtp.port);
    }
    if let Some(twilio) = &config.twilio {
        alerts = alerts.with_notifier(Arc::new(SmsNotifier::new(twilio)?));
        info!("SMS alerts enabled");
    }
    alerts = alerts.with_notifier(Arc::new(WebhookNotifier::new()?));

    Ok(alerts)
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    let log_dir = std::env::var("BRIDGE_MONITOR_LOG_DIR")
        .ok()
        .or_else(|| logging.dir.clone());

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let mut guard = None;
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let test_path = std::path::Path::new(dir).join(".bridge_monitor_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(dir, "bridge_monitor.log");
                let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
                None
            }
        }
    });

    let console_layer = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/bridge_monitor.log", dir);
    }

    guard
}
