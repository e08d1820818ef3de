//! Integration tests for the WebSocket transport.
//!
//! These tests run a real `ConnectionManager` against a local mock server:
//! - Connection establishment and re-subscription
//! - Dynamic subscribe/unsubscribe on the live connection
//! - Event fan-out and keep-alive pings

pub mod common;
