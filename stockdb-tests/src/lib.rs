//! Test utilities for the stockdb workspace
//!
//! Runs a real daemon in-process against a temporary state directory and
//! provides builders for the resources clients apply to it.

pub mod helpers;

pub use helpers::collection_builder::CollectionBuilder;
pub use helpers::daemon_harness::{PendingApply, TestDaemon};
pub use helpers::wait_utils::{WaitError, wait_until};
