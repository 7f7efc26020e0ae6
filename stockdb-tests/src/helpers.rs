pub mod collection_builder;
pub mod daemon_harness;
pub mod wait_utils;
