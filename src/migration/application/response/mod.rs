pub mod drain_report;
pub mod migration_report;
