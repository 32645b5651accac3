//! Shared test utilities for docsorter integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution with temp directories
//! - Fake extraction/analysis collaborators and a recording observer

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{wait_until, TestHarness};
