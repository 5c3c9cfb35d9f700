//! Test suite for FinTrack Sync
//!
//! This module organizes all tests

pub mod property;
