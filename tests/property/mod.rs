//! Property-based tests
//!
//! Uses proptest to check backoff, status derivation and queue ordering
//! over generated inputs.

pub mod retry_proptest;
pub mod status_proptest;
