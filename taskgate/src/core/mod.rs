//! Deterministic, pure logic shared by the execution core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod diff;
pub mod error;
pub mod path;
pub mod resolve;
pub mod types;
pub mod verdict;
