pub mod api_client;
pub mod config;
pub mod control_plane;
pub mod datastore;
pub mod hypervisor;
pub mod remote_shell;
