pub mod drain_request;
pub mod migrate_volume_request;
pub mod migrate_workload_request;
