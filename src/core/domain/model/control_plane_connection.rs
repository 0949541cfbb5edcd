use crate::core::domain::value_object::{ApiPassword, ApiUsername, ControlPlaneUrl};

/// Everything needed to open a session with the control plane.
#[derive(Debug, Clone)]
pub struct ControlPlaneConnection {
    url: ControlPlaneUrl,
    username: ApiUsername,
    password: ApiPassword,
    domain: String,
    accept_invalid_certs: bool,
}

impl ControlPlaneConnection {
    pub fn new(
        url: ControlPlaneUrl,
        username: ApiUsername,
        password: ApiPassword,
        domain: String,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            url,
            username,
            password,
            domain,
            accept_invalid_certs,
        }
    }

    pub fn url(&self) -> &ControlPlaneUrl {
        &self.url
    }

    pub fn username(&self) -> &ApiUsername {
        &self.username
    }

    pub fn password(&self) -> &ApiPassword {
        &self.password
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }
}
