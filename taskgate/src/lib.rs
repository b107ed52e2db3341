//! Execution core for an automated coding assistant.
//!
//! A goal is planned into steps; each step mutates one file and is validated
//! by running the project's test suite. Any failure rolls back every file the
//! task touched. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (diffing, step resolution, test
//!   verdicts, path confinement). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (sandboxed file edits, process
//!   execution, configuration, the rollback journal, external collaborators).
//!
//! Orchestration modules ([`task`], [`recover`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recover;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
