//! Process exit codes. Part of the CLI contract; scripts branch on them.

pub const SUCCESS: i32 = 0;
pub const COMMAND_FAILED: i32 = 1; // Command ran and failed (check found problems, login timed out, ...)
pub const CONFIG_ERROR: i32 = 2; // Required configuration missing or invalid; nothing was started
