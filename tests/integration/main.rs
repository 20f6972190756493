//! Integration tests for the crawl coordinator
//!
//! Each scenario runs the coordinator end to end through the public API,
//! with scripted collaborators standing in for the network.

mod common;
mod crawl_tests;
mod recovery_tests;
mod scenario_tests;
