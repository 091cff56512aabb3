//! Integration test crate for the EmpowerGrid oracle engine.
//!
//! This crate has no library code — it only contains integration tests
//! that run consensus rounds against provider endpoints served locally
//! over HTTP.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p empower-integration-tests
//! ```
