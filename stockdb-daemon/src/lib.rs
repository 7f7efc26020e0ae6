//! stockdb control-plane daemon.
//!
//! Accepts `apply` commands over a Unix socket, persists each data
//! collection as a job and feeds it to the job queue.

pub mod config;
pub mod daemon;
pub mod errors;
pub mod handlers;
pub mod jobqueue;
pub mod jobs;
pub mod logging;
pub mod manager;
pub mod store;
pub mod upstream;

pub use daemon::Daemon;
