use std::fmt;

use crate::baseline::table::PairingTableError;
use crate::model::ParseEnumError;
use crate::model::work_item::WorkItemParseError;
use crate::xunit::XUnitParseError;

/// Machine-readable error codes for operators and log scrapers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    MissingCredentials,
    QueueUnavailable,
    InvalidWorkItem,
    InvalidStatusValue,
    MalformedPairingTable,
    XUnitParseFailed,
    CollaboratorRequestFailed,
    RateLimited,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::MissingCredentials => "E1002",
            Self::QueueUnavailable => "E2001",
            Self::InvalidWorkItem => "E2002",
            Self::InvalidStatusValue => "E3001",
            Self::MalformedPairingTable => "E3002",
            Self::XUnitParseFailed => "E3003",
            Self::CollaboratorRequestFailed => "E5001",
            Self::RateLimited => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::MissingCredentials => "Missing API credentials",
            Self::QueueUnavailable => "Work queue unavailable",
            Self::InvalidWorkItem => "Invalid work item",
            Self::InvalidStatusValue => "Unrecognized status value",
            Self::MalformedPairingTable => "Malformed reproduction table",
            Self::XUnitParseFailed => "XUnit document could not be parsed",
            Self::CollaboratorRequestFailed => "External service request failed",
            Self::RateLimited => "Rate limit retries exhausted",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in shepherd.toml and retry."),
            Self::MissingCredentials => {
                Some("Export the *_TOKEN variables listed above before starting shepherd.")
            }
            Self::QueueUnavailable => {
                Some("Check that the queue database path is writable and not held open elsewhere.")
            }
            Self::InvalidWorkItem => Some("Run `shepherd clear-queue` to drop corrupt entries."),
            Self::InvalidStatusValue => Some(
                "A tracker workflow changed. Extend the status enums before processing resumes.",
            ),
            Self::MalformedPairingTable => {
                Some("Edit or delete the reproduction comment, then remove the reproducing label.")
            }
            Self::XUnitParseFailed => None,
            Self::CollaboratorRequestFailed => Some("Retry once. Check service status if persistent."),
            Self::RateLimited => Some("Lower the collector frequency or wait for the quota to reset."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }

    /// Classify an error chain by the first typed error found in it.
    #[must_use]
    pub fn classify(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if cause.is::<ParseEnumError>() {
                return Self::InvalidStatusValue;
            }
            if cause.is::<PairingTableError>() {
                return Self::MalformedPairingTable;
            }
            if cause.is::<XUnitParseError>() {
                return Self::XUnitParseFailed;
            }
            if cause.is::<WorkItemParseError>() {
                return Self::InvalidWorkItem;
            }
            if cause.is::<toml::de::Error>() {
                return Self::ConfigParseError;
            }
            if cause.is::<rusqlite::Error>() {
                return Self::QueueUnavailable;
            }
            if let Some(coded) = cause.downcast_ref::<CodedError>() {
                return coded.code;
            }
        }
        Self::InternalUnexpected
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An error raised outside this crate that still wants a stable code, such as
/// exhausted rate-limit retries in an HTTP adapter.
#[derive(Debug, thiserror::Error)]
#[error("{detail}")]
pub struct CodedError {
    pub code: ErrorCode,
    pub detail: String,
}

impl CodedError {
    #[must_use]
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}
