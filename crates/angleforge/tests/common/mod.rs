//! Shared test utilities for angleforge integration tests.
//!
//! This module provides:
//! - `FakeUpstream` and `RecordingLedger`, scriptable stand-ins for the
//!   generation service and the credit ledger
//! - `TestHarness` wiring them to a real on-disk database

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
