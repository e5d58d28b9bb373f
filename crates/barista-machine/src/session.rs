//! REST session manager for the vendor cloud.
//!
//! Owns the access/refresh token pair and the installation identity, and
//! performs every authenticated REST call. Tokens are never persisted;
//! a restart re-derives them via sign-in.
//!
//! Not reentrant: one logical session per appliance, callers hold
//! `&mut self` and thereby serialize access.

use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use barista_core::config::CloudConfig;
use barista_core::error::{Error, Result};
use barista_crypto::{
    HEADER_INSTALLATION_ID, HEADER_NONCE, HEADER_PROOF, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    InstallationKey, SignedHeaders, base_string, request_proof, signed_headers,
};

/// Bearer token pair returned by sign-in/refresh.
///
/// `expires_at` is monotonic: wall-clock jumps (NTP sync after boot) can
/// never make a fresh token look expired or a stale one look valid.
#[derive(Debug, Clone)]
struct AccessToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

/// What `get_access_token` should do with the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenAction {
    UseCurrent,
    Refresh,
    SignIn,
}

/// REST client for the vendor customer-app API.
pub struct SessionManager {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    identity: InstallationKey,
    token: Option<AccessToken>,
    refresh_margin: Duration,
    registered: bool,
}

impl SessionManager {
    /// Build a session from a loaded identity.
    pub fn new(config: &CloudConfig, identity: InstallationKey) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("https://{}/api/customer-app", config.host),
            username: config.username.clone(),
            password: config.password.clone(),
            identity,
            token: None,
            refresh_margin: Duration::from_secs(config.refresh_margin_secs),
            registered: false,
        }
    }

    /// Build a session from an optional identity record.
    ///
    /// Fails with [`Error::NotProvisioned`] when no identity exists yet;
    /// the caller must provision (generate + save) one first.
    pub fn init(config: &CloudConfig, identity: Option<InstallationKey>) -> Result<Self> {
        let identity = identity.ok_or(Error::NotProvisioned)?;
        Ok(Self::new(config, identity))
    }

    /// Signed headers for the current identity (used by the WebSocket
    /// upgrade request as well as every REST call).
    pub fn signed_headers(&self) -> Result<SignedHeaders> {
        Ok(signed_headers(&self.identity)?)
    }

    /// One-time installation registration (`POST /auth/init`).
    ///
    /// Idempotent: any 2xx is success. Failure is soft; the session
    /// retries lazily before the next authenticated call.
    pub async fn register(&self) -> Result<()> {
        let base = base_string(&self.identity);
        let proof = request_proof(self.identity.secret(), &base);
        let body = json!({ "pk": BASE64.encode(self.identity.public_key_der()) });

        let response = self
            .http
            .post(format!("{}/auth/init", self.base_url))
            .header(HEADER_INSTALLATION_ID, self.identity.installation_id())
            .header(HEADER_PROOF, proof)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Return a currently-valid access token, signing in or refreshing as
    /// needed. Refresh failures always degrade to a full sign-in.
    pub async fn get_access_token(&mut self) -> Result<String> {
        self.ensure_registered().await;

        match next_token_action(self.token.as_ref(), Instant::now(), self.refresh_margin) {
            TokenAction::UseCurrent => {}
            TokenAction::Refresh => {
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Token refresh failed, falling back to sign-in");
                    self.sign_in().await?;
                }
            }
            TokenAction::SignIn => self.sign_in().await?,
        }

        self.token
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| Error::Transport("no access token after sign-in".into()))
    }

    /// Authenticated REST call. Ensures token validity, attaches the
    /// bearer token plus the four signed headers, and fails with
    /// [`Error::Http`] on any non-2xx response.
    pub async fn api_call(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.get_access_token().await?;

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, endpoint))
            .bearer_auth(token);
        builder = self.attach_signed_headers(builder)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Lazy registration retry. Never fails the calling operation.
    async fn ensure_registered(&mut self) {
        if self.registered {
            return;
        }
        match self.register().await {
            Ok(()) => {
                info!("Installation registered with vendor cloud");
                self.registered = true;
            }
            Err(e) => {
                warn!(error = %e, "Registration failed, will retry on next call");
            }
        }
    }

    async fn sign_in(&mut self) -> Result<()> {
        let body = json!({ "username": self.username, "password": self.password });
        let value = self.post_auth("/auth/signin", &body).await?;
        self.token = Some(parse_token_response(&value, None)?);
        info!("Signed in to vendor cloud");
        Ok(())
    }

    /// Refresh the access token, keeping the old refresh token when the
    /// response omits one. Degrades to sign-in if there is nothing to
    /// refresh with.
    async fn refresh(&mut self) -> Result<()> {
        let Some(refresh_token) = self.token.as_ref().and_then(|t| t.refresh_token.clone())
        else {
            return self.sign_in().await;
        };

        let body = json!({ "username": self.username, "refreshToken": refresh_token });
        let value = self.post_auth("/auth/refreshtoken", &body).await?;
        self.token = Some(parse_token_response(&value, Some(refresh_token))?);
        debug!("Access token refreshed");
        Ok(())
    }

    async fn post_auth(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body);
        builder = self.attach_signed_headers(builder)?;

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn attach_signed_headers(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let headers = signed_headers(&self.identity)?;
        Ok(builder
            .header(HEADER_INSTALLATION_ID, &headers.installation_id)
            .header(HEADER_TIMESTAMP, &headers.timestamp)
            .header(HEADER_NONCE, &headers.nonce)
            .header(HEADER_SIGNATURE, &headers.signature))
    }
}

/// Token policy: refresh inside the margin window when a refresh token
/// exists and the token has not fully expired; otherwise sign in again.
fn next_token_action(
    token: Option<&AccessToken>,
    now: Instant,
    refresh_margin: Duration,
) -> TokenAction {
    let Some(token) = token else {
        return TokenAction::SignIn;
    };
    if token.expires_at >= now + refresh_margin {
        return TokenAction::UseCurrent;
    }
    if token.refresh_token.is_some() && token.expires_at > now {
        TokenAction::Refresh
    } else {
        TokenAction::SignIn
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

fn parse_token_response(value: &Value, previous_refresh: Option<String>) -> Result<AccessToken> {
    let response: TokenResponse = serde_json::from_value(value.clone())?;
    Ok(AccessToken {
        access_token: response.access_token,
        refresh_token: response.refresh_token.or(previous_refresh),
        expires_at: Instant::now() + Duration::from_secs(response.expires_in),
    })
}
