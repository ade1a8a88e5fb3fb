//! Integration test crate for the SWIM membership protocol.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise end-to-end membership flows across a loopback network
//! of several `swim-core::lifecycle::Node`s.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p swim-integration-tests
//! ```
