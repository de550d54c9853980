//! Stable exit codes for `parser-agent` commands.

use crate::core::types::RunStatus;

/// A parser was accepted (`run`) or still matches its sample (`verify`).
pub const OK: i32 = 0;
/// All attempts failed validation (`run`), or the persisted parser no longer matches (`verify`).
pub const EXHAUSTED: i32 = 1;
/// The run stopped on a blocking condition or an internal failure.
pub const FATAL: i32 = 2;

pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => OK,
        RunStatus::ExhaustedRetries => EXHAUSTED,
        RunStatus::FatalError => FATAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_distinct_codes() {
        assert_eq!(for_status(RunStatus::Success), 0);
        assert_eq!(for_status(RunStatus::ExhaustedRetries), 1);
        assert_eq!(for_status(RunStatus::FatalError), 2);
    }
}
