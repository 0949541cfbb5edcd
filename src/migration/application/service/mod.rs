pub mod host_drain;
pub mod job_tracker;
pub mod target_selector;
pub mod volume_migration;
