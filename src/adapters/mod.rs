pub mod email;
pub mod influx;
pub mod portal_auth;
pub mod portal_ws;
pub mod sms;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_http;

pub use email::EmailNotifier;
pub use influx::InfluxRecorder;
pub use portal_auth::{Authenticator, Credential, PortalAuthenticator, Session, SESSION_COOKIE};
pub use portal_ws::{
    ConnectionHandle, ConnectionState, ConnectionSupervisor, ReconnectPolicy, StreamHandler,
};
pub use sms::SmsNotifier;
pub use webhook::WebhookNotifier;
