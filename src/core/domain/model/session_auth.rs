use crate::core::domain::value_object::SessionKey;

/// An authenticated control-plane session.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    session_key: SessionKey,
}

impl SessionAuth {
    pub fn new(session_key: SessionKey) -> Self {
        Self { session_key }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }
}
