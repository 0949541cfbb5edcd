pub mod cluster_maintenance;
