pub mod cache;
pub mod graph;
pub mod watch;
