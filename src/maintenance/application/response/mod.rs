pub mod maintenance_report;
