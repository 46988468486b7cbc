// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error kind shared across the session manager, mailbox, and the
/// 9P filesystem server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Busy,
    NotRunning,
    StartupFailed,
    HostError,
    Permission,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Busy => "BUSY",
            Self::NotRunning => "NOT_RUNNING",
            Self::StartupFailed => "STARTUP_FAILED",
            Self::HostError => "HOST_ERROR",
            Self::Permission => "PERMISSION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broker-level error: a stable [`ErrorKind`] plus a human-readable detail.
#[derive(Debug, Clone)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BrokerError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, detail)
    }

    pub fn busy(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, detail)
    }

    pub fn not_running(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotRunning, detail)
    }

    pub fn startup_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::StartupFailed, detail)
    }

    pub fn host_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::HostError, detail)
    }

    pub fn permission(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, detail)
    }

    /// Render the text carried in a 9P `Rerror` frame.
    pub fn to_9p_error(&self) -> String {
        format!("{}: {}", self.kind.as_str(), self.detail)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for BrokerError {}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "error_tests.rs"]
mod tests;
