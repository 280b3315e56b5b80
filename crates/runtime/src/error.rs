// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds shared by every layer of the runtime.
///
/// The message loop inspects the kind to decide whether an error is fatal:
/// only [`CoreError::Read`], [`CoreError::Write`], [`CoreError::RestartApp`]
/// and [`CoreError::Restart`] break the loop, everything else is logged and
/// suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// Heap or NVRAM exhausted.
    Resources,
    /// Bad argument or malformed wire value.
    Invalid,
    /// Message is not for this layer.
    NoMatch,
    /// A blocking operation timed out.
    Timeout,
    /// Transport read side lost.
    Read,
    /// Transport write side lost.
    Write,
    /// Peripheral driver refused the operation.
    Driver,
    /// Debugger command not allowed in the current state.
    Busy,
    /// Script engine must be restarted; the bus attachment survives.
    RestartApp,
    /// Full restart required.
    Restart,
    /// Undiagnosed internal failure.
    Fail(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resources => "RESOURCES",
            Self::Invalid => "INVALID",
            Self::NoMatch => "NO_MATCH",
            Self::Timeout => "TIMEOUT",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Driver => "DRIVER",
            Self::Busy => "BUSY",
            Self::RestartApp => "RESTART_APP",
            Self::Restart => "RESTART",
            Self::Fail(_) => "FAIL",
        }
    }

    /// Numeric code used as the process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resources => 2,
            Self::Invalid => 3,
            Self::NoMatch => 4,
            Self::Timeout => 5,
            Self::Read => 6,
            Self::Write => 7,
            Self::Driver => 8,
            Self::Busy => 9,
            Self::RestartApp => 10,
            Self::Restart => 11,
            Self::Fail(_) => 1,
        }
    }

    /// Whether the message loop must exit when a dispatch returns this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Read | Self::Write | Self::RestartApp | Self::Restart)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail(detail) => write!(f, "FAIL({detail})"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for CoreError {}
