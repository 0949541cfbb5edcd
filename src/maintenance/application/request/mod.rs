pub mod maintenance_request;
