//! Stable exit codes for taskgate CLI commands.

/// Command succeeded (task completed, tests passed, nothing to recover).
pub const OK: i32 = 0;
/// Command failed due to invalid arguments/config/journal or other errors.
pub const INVALID: i32 = 1;
/// The task or test run failed and every touched file was restored.
pub const ROLLED_BACK: i32 = 2;
/// Rollback or recovery left files unrestored; the journal is kept.
pub const ROLLBACK_INCOMPLETE: i32 = 3;
