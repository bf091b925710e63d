//! Portal WebSocket supervisor
//!
//! Owns the single stream to the portal. Frames are handed to a
//! [`StreamHandler`] one at a time in arrival order; outbound frames are queued
//! through a [`ConnectionHandle`] and written by the same task. On loss the
//! supervisor reconnects with capped exponential backoff until the retry budget
//! is spent, then stops for good.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::portal_auth::{Authenticator, Credential, Session};
use crate::config::ReconnectSettings;
use crate::coordination::ShutdownToken;
use crate::error::{AuthError, DeliveryError, MonitorError, Result};

/// Request header carrying the session cookie value
const SESSION_HEADER: &str = "sessionid";

/// How often to send ping frames
const PING_INTERVAL_SECS: u64 = 30;

/// Limit on a single connect handshake
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Outbound frames buffered between handler and writer
const OUTBOUND_CAPACITY: usize = 256;

/// Supervisor lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Open,
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal; only a process restart leaves it
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {}, in {:?})", attempt, delay)
            }
            ConnectionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Reconnect backoff.
///
/// The delay after failure `n` (1-based) is `initial × factor^n`, capped at
/// `max_delay`, then jittered by ±`jitter` and capped again.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Reconnect attempts allowed after consecutive failures
    pub max_retries: u32,
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            factor: settings.factor,
            max_delay: Duration::from_secs(settings.max_delay_secs),
            max_retries: settings.max_retries,
            jitter: settings.jitter,
        }
    }

    /// Un-jittered delay after `failures` consecutive failures
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exp = failures.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay actually slept after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let secs = (base.as_secs_f64() * (1.0 + spread)).max(0.0);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }

    /// True once `failures` consecutive failures exceed the retry budget
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }
}

/// Consumer of inbound text frames
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Called for every text frame, in arrival order, one at a time
    async fn on_frame(&self, text: &str);

    /// Called once each time an open stream is lost
    async fn on_disconnect(&self) {}
}

/// Cloneable sender side of the supervisor
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    identity: watch::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Our session identity, used as `source` on outbound frames
    pub fn local_identity(&self) -> String {
        self.identity.borrow().clone()
    }

    /// Queue a frame on the open stream without waiting.
    ///
    /// Frames offered while the stream is not open are dropped.
    pub fn send(&self, frame: String) -> std::result::Result<(), DeliveryError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(DeliveryError::NotOpen {
                state: state.to_string(),
            });
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull("portal".to_string()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::NotOpen {
                state: ConnectionState::Stopped.to_string(),
            },
        })
    }
}

/// How one stream session ended
enum StreamEnd {
    Closed,
    Shutdown,
}

/// Supervisor for the portal stream
pub struct ConnectionSupervisor {
    authenticator: Arc<dyn Authenticator>,
    credential: Credential,
    policy: ReconnectPolicy,
    reauth_on_reconnect: bool,
    state_tx: watch::Sender<ConnectionState>,
    identity_tx: watch::Sender<String>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: mpsc::Receiver<String>,
}

impl ConnectionSupervisor {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credential: Credential,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (identity_tx, _) = watch::channel(String::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        Self {
            authenticator,
            credential,
            policy,
            reauth_on_reconnect: false,
            state_tx,
            identity_tx,
            outbound_tx,
            outbound_rx,
        }
    }

    /// Repeat the login handshake before each reconnect
    pub fn with_reauth_on_reconnect(mut self, enabled: bool) -> Self {
        self.reauth_on_reconnect = enabled;
        self
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            state: self.state_tx.subscribe(),
            identity: self.identity_tx.subscribe(),
            outbound: self.outbound_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Portal connection state: {}", state);
        self.state_tx.send_replace(state);
    }

    /// Run the login handshake and adopt the resulting session identity
    pub async fn authenticate(&self) -> std::result::Result<Session, AuthError> {
        self.set_state(ConnectionState::Authenticating);
        let session = self.authenticator.authenticate(&self.credential).await?;
        self.identity_tx.send_replace(session.identity.clone());
        Ok(session)
    }

    /// Keep the stream up until shutdown or until the retry budget is spent
    pub async fn run(
        mut self,
        session: Session,
        handler: Arc<dyn StreamHandler>,
        mut shutdown: ShutdownToken,
    ) -> Result<()> {
        let mut session = session;
        let mut failures: u32 = 0;

        self.identity_tx.send_replace(session.identity.clone());
        info!("Starting portal stream to {}", session.endpoint);

        loop {
            let mut opened = false;

            let outcome = if failures > 0 && self.reauth_on_reconnect {
                let login = tokio::select! {
                    res = self.authenticate() => Some(res),
                    _ = shutdown.cancelled() => None,
                };
                match login {
                    None => Ok(StreamEnd::Shutdown),
                    Some(Err(e)) => Err(MonitorError::Auth(e)),
                    Some(Ok(fresh)) => {
                        session = fresh;
                        self.stream(&session, handler.as_ref(), &mut shutdown, &mut opened)
                            .await
                    }
                }
            } else {
                self.stream(&session, handler.as_ref(), &mut shutdown, &mut opened)
                    .await
            };

            match outcome {
                Ok(StreamEnd::Shutdown) => {
                    self.set_state(ConnectionState::Stopped);
                    info!("Portal stream stopped by shutdown");
                    return Ok(());
                }
                Ok(StreamEnd::Closed) => info!("Portal stream closed"),
                Err(e) => warn!("Portal stream error: {}", e),
            }

            if opened {
                failures = 0;
                handler.on_disconnect().await;
            }

            failures = failures.saturating_add(1);
            if self.policy.exhausted(failures) {
                self.set_state(ConnectionState::Stopped);
                error!(
                    "Giving up on portal stream after {} consecutive failures",
                    failures
                );
                return Err(MonitorError::ReconnectExhausted { attempts: failures });
            }

            let delay = self.policy.delay(failures);
            self.set_state(ConnectionState::Reconnecting {
                attempt: failures,
                delay,
            });
            info!(
                "Reconnecting to portal in {:?} (attempt {}/{})",
                delay, failures, self.policy.max_retries
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    self.set_state(ConnectionState::Stopped);
                    info!("Reconnect cancelled by shutdown");
                    return Ok(());
                }
            }
        }
    }

    /// Open the stream and pump frames until it ends
    async fn stream(
        &mut self,
        session: &Session,
        handler: &dyn StreamHandler,
        shutdown: &mut ShutdownToken,
        opened: &mut bool,
    ) -> Result<StreamEnd> {
        self.set_state(ConnectionState::Connecting);

        let mut request = session.endpoint.as_str().into_client_request()?;
        let token = HeaderValue::from_str(&session.token)
            .map_err(|e| MonitorError::Connection(format!("Invalid session token: {}", e)))?;
        request
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), token);

        debug!("Connecting to portal stream: {}", session.endpoint);

        let connect = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(request),
        );
        let ws_stream = tokio::select! {
            res = connect => {
                res.map_err(|_| MonitorError::Connection("Portal connection timeout".to_string()))??.0
            }
            _ = shutdown.cancelled() => return Ok(StreamEnd::Shutdown),
        };

        // Frames queued while disconnected are stale
        while self.outbound_rx.try_recv().is_ok() {}

        *opened = true;
        self.set_state(ConnectionState::Open);
        info!("Portal stream open");

        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handler.on_frame(&text).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match String::from_utf8(data) {
                                Ok(text) => handler.on_frame(&text).await,
                                Err(_) => warn!("Dropping non UTF-8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Received close frame: {:?}", frame);
                            return Ok(StreamEnd::Closed);
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            return Ok(StreamEnd::Closed);
                        }
                        _ => {}
                    }
                }
                Some(frame) = self.outbound_rx.recv() => {
                    write.send(Message::Text(frame)).await?;
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await?;
                    debug!("Sent ping");
                }
                _ = shutdown.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("Close frame not sent: {}", e);
                    }
                    return Ok(StreamEnd::Shutdown);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_handle(
    identity: &str,
    state: ConnectionState,
) -> (
    ConnectionHandle,
    watch::Sender<ConnectionState>,
    mpsc::Receiver<String>,
) {
    let (state_tx, state_rx) = watch::channel(state);
    let (_identity_tx, identity_rx) = watch::channel(identity.to_string());
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    (
        ConnectionHandle {
            state: state_rx,
            identity: identity_rx,
            outbound: outbound_tx,
        },
        state_tx,
        outbound_rx,
    )
}
