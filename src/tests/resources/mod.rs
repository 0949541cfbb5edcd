mod client_tests;
mod control_plane_tests;
