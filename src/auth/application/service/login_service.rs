use crate::{
    auth::application::{
        request::login_request::LoginRequest, response::login_response::LoginResponse,
    },
    core::domain::{
        error::{OpsError, OpsResult, ValidationError},
        model::{control_plane_connection::ControlPlaneConnection, session_auth::SessionAuth},
        value_object::{SessionKey, validate_session_key},
    },
};

use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, HeaderMap, HeaderValue},
};

/// Opens a session with the control plane.
///
/// The session cookie is kept by the cookie store of the `Client` passed to
/// [`LoginService::execute`], so the same client must be used for later calls.
pub struct LoginService {
    default_headers: HeaderMap,
}

impl LoginService {
    pub fn new() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Self { default_headers }
    }

    pub async fn execute(
        &self,
        client: &Client,
        connection: &ControlPlaneConnection,
    ) -> OpsResult<SessionAuth> {
        let request = self.build_login_request(connection);
        let mut url = connection.url().api_endpoint();
        url.query_pairs_mut().extend_pairs(request.params());

        let response = client
            .post(url)
            .headers(self.default_headers.clone())
            .send()
            .await
            .map_err(|e| OpsError::Connection(e.to_string()))?;

        match response.status() {
            StatusCode::OK => self.handle_successful_login(response).await,
            StatusCode::UNAUTHORIZED => Err(OpsError::Authentication(
                "Invalid credentials provided".to_string(),
            )),
            StatusCode::BAD_REQUEST => Err(ValidationError::Field {
                field: "request".to_string(),
                message: "Invalid login request format".to_string(),
            }
            .into()),
            StatusCode::NOT_FOUND => Err(OpsError::Connection(
                "Login endpoint not found".to_string(),
            )),
            StatusCode::SERVICE_UNAVAILABLE => Err(OpsError::Connection(
                "Control plane is currently unavailable".to_string(),
            )),
            status => Err(OpsError::Connection(format!(
                "Unexpected response status: {}",
                status
            ))),
        }
    }

    fn build_login_request(&self, connection: &ControlPlaneConnection) -> LoginRequest {
        LoginRequest {
            username: connection.username().as_str().to_string(),
            password: connection.password().as_str().to_string(),
            domain: connection.domain().to_string(),
        }
    }

    async fn handle_successful_login(&self, response: reqwest::Response) -> OpsResult<SessionAuth> {
        let login_response = response.json::<LoginResponse>().await.map_err(|e| {
            OpsError::Connection(format!("Failed to parse login response: {}", e))
        })?;

        validate_session_key(&login_response.data.session_key)?;
        tracing::debug!(
            user = login_response.data.username.as_deref().unwrap_or("-"),
            "control-plane session opened"
        );
        Ok(SessionAuth::new(SessionKey::new_unchecked(
            login_response.data.session_key,
        )))
    }
}

impl Default for LoginService {
    fn default() -> Self {
        Self::new()
    }
}
