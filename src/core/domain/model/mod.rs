pub mod async_job;
pub mod cluster;
pub mod control_plane_connection;
pub mod host;
pub mod operation_context;
pub mod session_auth;
pub mod storage_pool;
pub mod volume;
pub mod workload;
