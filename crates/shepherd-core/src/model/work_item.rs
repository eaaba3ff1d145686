use std::{fmt, str::FromStr};

/// What a queued work item asks the dispatcher to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkItemKind {
    ProcessIssue,
    ProcessErratum,
}

impl WorkItemKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessIssue => "process_issue",
            Self::ProcessErratum => "process_erratum",
        }
    }
}

/// A unit of deferred work. Identity is the `(kind, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub kind: WorkItemKind,
    pub key: String,
}

impl WorkItem {
    pub fn issue(key: impl Into<String>) -> Self {
        Self {
            kind: WorkItemKind::ProcessIssue,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn erratum(id: u64) -> Self {
        Self {
            kind: WorkItemKind::ProcessErratum,
            key: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkItemParseError {
    #[error("work item '{0}' has no ':' separator")]
    MissingSeparator(String),
    #[error("unknown work item kind '{0}'")]
    UnknownKind(String),
    #[error("work item '{0}' has an empty key")]
    EmptyKey(String),
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

impl FromStr for WorkItemKind {
    type Err = WorkItemParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process_issue" => Ok(Self::ProcessIssue),
            "process_erratum" => Ok(Self::ProcessErratum),
            other => Err(WorkItemParseError::UnknownKind(other.to_string())),
        }
    }
}

impl FromStr for WorkItem {
    type Err = WorkItemParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, key) = s
            .split_once(':')
            .ok_or_else(|| WorkItemParseError::MissingSeparator(s.to_string()))?;
        if key.is_empty() {
            return Err(WorkItemParseError::EmptyKey(s.to_string()));
        }
        Ok(Self {
            kind: kind.parse()?,
            key: key.to_string(),
        })
    }
}
