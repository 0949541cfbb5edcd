//! Internal HTTP client that handles authentication, throttling and response envelopes.

use crate::{
    auth::application::service::login_service::LoginService,
    core::{
        domain::{
            error::{OpsError, OpsResult, TransientKind, ValidationError},
            model::{control_plane_connection::ControlPlaneConnection, session_auth::SessionAuth},
        },
        infrastructure::config::ClientSettings,
    },
};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Control-plane error code used for invalid or ambiguous parameters.
const PARAM_ERROR_CODE: u16 = 431;

/// Internal HTTP client that manages the session and provides a single `call` entry point.
///
/// Every command is sent to the API endpoint with `command`, `response=json` and the
/// current `sessionkey`. If a request receives a `401 Unauthorized` response, the client
/// logs in again once using the stored credentials and retries the request once.
#[derive(Debug)]
pub struct ApiClient {
    http_client: Client,
    connection: Arc<ControlPlaneConnection>,
    auth: Arc<RwLock<Option<SessionAuth>>>,
    settings: ClientSettings,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ApiClient {
    /// Creates a new `ApiClient`. The client starts unauthenticated.
    ///
    /// # Errors
    /// Returns `OpsError::Connection` if the HTTP client cannot be built and
    /// `OpsError::Validation` if the rate limit is configured with zero values.
    pub fn new(connection: ControlPlaneConnection, settings: ClientSettings) -> OpsResult<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(connection.accept_invalid_certs())
            .cookie_store(true)
            .build()
            .map_err(|e| OpsError::Connection(e.to_string()))?;

        let rate_limiter = match settings.rate_limit {
            Some(rl) => {
                let per_second = NonZeroU32::new(rl.requests_per_second).ok_or_else(|| {
                    ValidationError::Field {
                        field: "rate_limit.requests_per_second".to_string(),
                        message: "must be greater than zero".to_string(),
                    }
                })?;
                let burst =
                    NonZeroU32::new(rl.burst_size).ok_or_else(|| ValidationError::Field {
                        field: "rate_limit.burst_size".to_string(),
                        message: "must be greater than zero".to_string(),
                    })?;
                let quota = Quota::per_second(per_second).allow_burst(burst);
                Some(Arc::new(DefaultDirectRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            http_client,
            connection: Arc::new(connection),
            auth: Arc::new(RwLock::new(None)),
            settings,
            rate_limiter,
        })
    }

    /// Sets the authentication state (used after a successful login).
    pub async fn set_auth(&self, auth: SessionAuth) {
        let mut lock = self.auth.write().await;
        *lock = Some(auth);
    }

    /// Returns `true` if there is a session that has not outlived its lifetime.
    pub async fn is_authenticated(&self) -> bool {
        let lock = self.auth.read().await;
        lock.as_ref()
            .map(|a| !a.session_key().is_expired(self.settings.session_lifetime))
            .unwrap_or(false)
    }

    /// Opens a fresh session.
    pub async fn login(&self) -> OpsResult<()> {
        self.refresh_auth().await
    }

    /// Executes a control-plane command and returns the content of its response envelope.
    ///
    /// # Type Parameters
    /// - `T`: The expected type of the `<command>response` object.
    ///
    /// # Errors
    /// Returns `OpsError::Transient` for a reset connection or an ambiguous response,
    /// `OpsError::Api` for any other rejection and `OpsError::Connection` for transport
    /// and parsing failures.
    pub async fn call<T>(&self, command: &str, params: &[(&str, String)]) -> OpsResult<T>
    where
        T: DeserializeOwned,
    {
        self.ensure_authenticated().await?;

        let body = match self.execute_request(command, params).await {
            Err(OpsError::Authentication(_)) => {
                self.refresh_auth().await?;
                // Retry exactly once
                self.execute_request(command, params).await?
            }
            other => other?,
        };

        let inner = unwrap_envelope(command, body)?;
        serde_json::from_value(inner).map_err(|e| {
            OpsError::Connection(format!("Failed to parse {} response: {}", command, e))
        })
    }

    async fn execute_request(&self, command: &str, params: &[(&str, String)]) -> OpsResult<Value> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let session_key = self
            .auth
            .read()
            .await
            .as_ref()
            .map(|auth| auth.session_key().as_str().to_string());

        let mut url = self.connection.url().api_endpoint();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("command", command);
            query.append_pair("response", "json");
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(key) = &session_key {
                query.append_pair("sessionkey", key);
            }
        }

        tracing::trace!(command, "control-plane request");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(OpsError::Authentication(format!(
                "{} rejected: session not authorized",
                command
            )));
        }

        let text = response.text().await.map_err(classify_transport_error)?;
        let body: Value = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                OpsError::Connection(format!("Failed to parse response: {}", e))
            } else {
                OpsError::Api {
                    code: status.as_u16(),
                    text,
                }
            }
        })?;

        if let Some(error) = api_error(&body) {
            return Err(error);
        }
        if !status.is_success() {
            return Err(OpsError::Api {
                code: status.as_u16(),
                text: body.to_string(),
            });
        }
        Ok(body)
    }

    /// Ensures that we have a valid (non-expired) session. If not, logs in.
    async fn ensure_authenticated(&self) -> OpsResult<()> {
        if !self.is_authenticated().await {
            self.refresh_auth().await?;
        }
        Ok(())
    }

    async fn refresh_auth(&self) -> OpsResult<()> {
        let service = LoginService::new();
        let auth = service.execute(&self.http_client, &self.connection).await?;
        self.set_auth(auth).await;
        Ok(())
    }
}

/// Maps a transport failure, looking through the source chain for a reset connection.
fn classify_transport_error(error: reqwest::Error) -> OpsError {
    if is_connection_reset(&error) {
        return OpsError::Transient(TransientKind::ConnectionReset);
    }
    OpsError::Connection(format!("HTTP request failed: {}", error))
}

fn is_connection_reset(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        source = err.source();
    }
    false
}

/// Translates a control-plane error code into an error kind.
///
/// This is the only place error text is inspected: the control plane reports a
/// duplicated status field with the generic parameter error code.
pub(crate) fn classify_api_error(code: u16, text: &str) -> OpsError {
    let lowered = text.to_ascii_lowercase();
    if code == PARAM_ERROR_CODE && (lowered.contains("ambiguous") || lowered.contains("duplicate"))
    {
        return OpsError::Transient(TransientKind::AmbiguousResponse);
    }
    OpsError::Api {
        code,
        text: text.to_string(),
    }
}

/// Finds an `errorcode`/`errortext` pair in the response envelope.
fn api_error(body: &Value) -> Option<OpsError> {
    let inner = body.as_object()?.values().next()?;
    let code = inner.get("errorcode")?.as_u64()?;
    let text = inner
        .get("errortext")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(classify_api_error(
        u16::try_from(code).unwrap_or(u16::MAX),
        text,
    ))
}

/// Extracts the `<command>response` object.
fn unwrap_envelope(command: &str, body: Value) -> OpsResult<Value> {
    let key = format!("{}response", command.to_ascii_lowercase());
    match body {
        Value::Object(mut map) => {
            if let Some(inner) = map.remove(&key) {
                return Ok(inner);
            }
            map.into_iter()
                .find(|(k, _)| k.ends_with("response"))
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    OpsError::Connection(format!("Response to {} has no envelope", command))
                })
        }
        _ => Err(OpsError::Connection(format!(
            "Response to {} is not an object",
            command
        ))),
    }
}
