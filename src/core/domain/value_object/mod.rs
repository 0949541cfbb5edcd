mod api_password;
mod api_username;
mod control_plane_url;
mod host_address;
mod session_key;
pub(crate) mod serde_helpers;

pub use api_password::ApiPassword;
pub use api_username::ApiUsername;
pub use control_plane_url::ControlPlaneUrl;
pub use host_address::HostAddress;
pub use session_key::SessionKey;

// Re-export validation functions for internal use
pub(crate) use api_password::validate_password;
pub(crate) use api_username::validate_username;
pub(crate) use control_plane_url::validate_url;
pub(crate) use session_key::validate_session_key;
