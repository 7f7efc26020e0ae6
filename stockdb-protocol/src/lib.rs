//! Control-plane protocol for the stockdb daemon.
//!
//! A client opens the daemon's Unix socket, writes one JSON [`protocol::Command`],
//! reads back one JSON [`protocol::Response`], and the connection is closed.

pub mod client;
pub mod errors;
pub mod protocol;
pub mod resource;
pub mod server;
pub mod tracker;
