#![forbid(unsafe_code)]

//! Case verdicts.

use nix::errno::Errno;
use std::fmt;
use thiserror::Error;

/// Terminal verdict of a case, assigned once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    /// The environment lacks a capability the case needs. Not a defect of
    /// the system under test.
    Aborted(String),
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("Passed"),
            Outcome::Failed(reason) => write!(f, "Failed ({reason})"),
            Outcome::Aborted(reason) => write!(f, "Not Run ({reason})"),
        }
    }
}

/// Why a phase stopped early.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaseError {
    #[error("{0}")]
    Failed(String),
    #[error("aborted: {0}")]
    Aborted(String),
}

impl CaseError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CaseError::Failed(reason.into())
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        CaseError::Aborted(reason.into())
    }

    /// Classify a socket error: a missing protocol option means the local
    /// stack cannot run the case at all.
    pub fn from_errno(context: &str, errno: Errno) -> Self {
        if errno == Errno::ENOPROTOOPT {
            CaseError::Aborted(format!("{context}: {}", errno.desc()))
        } else {
            CaseError::Failed(format!("{context}: {} ({})", errno.desc(), errno as i32))
        }
    }
}

impl From<CaseError> for Outcome {
    fn from(err: CaseError) -> Self {
        match err {
            CaseError::Failed(reason) => Outcome::Failed(reason),
            CaseError::Aborted(reason) => Outcome::Aborted(reason),
        }
    }
}
