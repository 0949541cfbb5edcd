/// Parameters of the control plane's `login` command.
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl LoginRequest {
    /// Query parameters in the order the API expects them.
    pub fn params(&self) -> [(&'static str, &str); 5] {
        [
            ("command", "login"),
            ("username", &self.username),
            ("password", &self.password),
            ("domain", &self.domain),
            ("response", "json"),
        ]
    }
}
