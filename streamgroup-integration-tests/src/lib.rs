//! Integration tests for `streamgroup`
//!
//! This crate contains integration tests that drive full subscriptions against
//! the in-memory log store, the testing doubles and each other.

// This is a test-only crate
#![cfg(test)]
