// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed exit-code enumeration (spec §6's "Updater companion CLI" bullet).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    GeneralFailure,
    InvalidArguments,
    StopFailed,
    BackupFailed,
    CopyFailed,
    StartFailed,
    WatchdogFailed,
    RollbackFailed,
}

impl ExitCode {
    /// The process exit status. `Success` is 0; every failure kind gets a
    /// distinct nonzero code so a calling service manager can distinguish
    /// them without parsing the log.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::GeneralFailure => 1,
            Self::InvalidArguments => 2,
            Self::StopFailed => 3,
            Self::BackupFailed => 4,
            Self::CopyFailed => 5,
            Self::StartFailed => 6,
            Self::WatchdogFailed => 7,
            Self::RollbackFailed => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::GeneralFailure => "general_failure",
            Self::InvalidArguments => "invalid_arguments",
            Self::StopFailed => "stop_failed",
            Self::BackupFailed => "backup_failed",
            Self::CopyFailed => "copy_failed",
            Self::StartFailed => "start_failed",
            Self::WatchdogFailed => "watchdog_failed",
            Self::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
