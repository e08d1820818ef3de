//! Integration tests for the tracker.
//!
//! A scripted in-memory data source drives a real `Tracker`:
//! - Startup initialization and readiness
//! - Dynamic add/remove with buffered diffs
//! - Staleness, snapshot replay and trade routing

pub mod common;
