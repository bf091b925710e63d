//! Portal login handshake
//!
//! A one-shot HTTP exchange that trades the client key for a session identity
//! (`cbid`) and a `sessionid` cookie. The cookie is later presented as the
//! `sessionid` header when opening the stream.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::PortalConfig;
use crate::error::AuthError;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "sessionid";

/// Client key presented at login. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Our own identity on the portal, used as `source` of outbound frames
    pub identity: String,
    /// Session cookie value
    pub token: String,
    /// Stream endpoint
    pub endpoint: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    key: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    cbid: String,
}

/// Performs the login handshake
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<Session, AuthError>;
}

/// HTTP authenticator against the portal login endpoint
#[derive(Clone)]
pub struct PortalAuthenticator {
    client: Client,
    auth_url: String,
    ws_url: String,
}

impl PortalAuthenticator {
    pub fn new(auth_url: impl Into<String>, ws_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .cookie_store(false)
            .build()?;
        Ok(Self {
            client,
            auth_url: auth_url.into(),
            ws_url: ws_url.into(),
        })
    }

    pub fn from_config(portal: &PortalConfig) -> Result<Self, AuthError> {
        Self::new(portal.auth_url(), portal.ws_url())
    }
}

#[async_trait]
impl Authenticator for PortalAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<Session, AuthError> {
        debug!("Authorising with {}", self.auth_url);

        let response = self
            .client
            .post(&self.auth_url)
            .json(&LoginRequest {
                key: credential.expose(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let token = response
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AuthError::MissingCookie(SESSION_COOKIE))?;

        let body = response.text().await?;
        let login: LoginResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Malformed(e.to_string()))?;

        info!("Authorised with portal as {}", login.cbid);

        Ok(Session {
            identity: login.cbid,
            token,
            endpoint: self.ws_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_http;

    const LOGIN_PATH: &str = "/api/client/v1/client_auth/login/";

    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let (base, handle) = test_http::one_shot_server(response).await;
        (format!("{}{}", base, LOGIN_PATH), handle)
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
        assert_eq!(credential.expose(), "super-secret");
    }

    #[tokio::test]
    async fn test_authenticate_reads_cbid_and_cookie() {
        let (url, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Set-Cookie: sessionid=tok123; Path=/\r\n\
             Content-Length: 16\r\n\
             Connection: close\r\n\r\n\
             {\"cbid\":\"CID7\"}\n",
        )
        .await;

        let auth = PortalAuthenticator::new(url, "ws://127.0.0.1:7522/").unwrap();
        let session = auth.authenticate(&Credential::new("k1")).await.unwrap();

        assert_eq!(
            session,
            Session {
                identity: "CID7".to_string(),
                token: "tok123".to_string(),
                endpoint: "ws://127.0.0.1:7522/".to_string(),
            }
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/client/v1/client_auth/login/"));
        assert!(request.contains("{\"key\":\"k1\"}"));
    }

    #[tokio::test]
    async fn test_authenticate_requires_cookie() {
        let (url, _server) = one_shot_server(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 16\r\n\
             Connection: close\r\n\r\n\
             {\"cbid\":\"CID7\"}\n",
        )
        .await;

        let auth = PortalAuthenticator::new(url, "ws://127.0.0.1:7522/").unwrap();
        let err = auth.authenticate(&Credential::new("k1")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCookie(SESSION_COOKIE)));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (url, _server) = one_shot_server(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let auth = PortalAuthenticator::new(url, "ws://127.0.0.1:7522/").unwrap();
        let err = auth.authenticate(&Credential::new("bad")).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 403 }));
    }
}
