use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::wire_enum;

/// Lifecycle status of a tracked issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueStatus {
    New,
    Planning,
    InProgress,
    Integration,
    ReleasePending,
    Closed,
}

wire_enum!(IssueStatus, "issue status", {
    New => "New",
    Planning => "Planning",
    InProgress => "In Progress",
    Integration => "Integration",
    ReleasePending => "Release Pending",
    Closed => "Closed",
});

impl IssueStatus {
    /// Statuses at which the supervisor's work on an issue is finished.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::ReleasePending | Self::Closed)
    }
}

/// Value of the preliminary-testing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreliminaryTesting {
    Requested,
    Fail,
    Pass,
    Ready,
}

wire_enum!(PreliminaryTesting, "preliminary testing value", {
    Requested => "Requested",
    Fail => "Fail",
    Pass => "Pass",
    Ready => "Ready",
});

/// One entry of the multi-valued test-coverage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCoverage {
    Manual,
    Automated,
    RegressionOnly,
    NewTestCoverage,
}

wire_enum!(TestCoverage, "test coverage value", {
    Manual => "Manual",
    Automated => "Automated",
    RegressionOnly => "RegressionOnly",
    NewTestCoverage => "New Test Coverage",
});

/// A comment on an issue or advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub created: DateTime<Utc>,
    pub body: String,
}

/// Full snapshot of a tracked issue, comments included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub url: String,
    pub summary: String,
    pub status: IssueStatus,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub advisory_link: Option<String>,
    #[serde(default)]
    pub fixed_in_build: Option<String>,
    #[serde(default)]
    pub test_coverage: Option<Vec<TestCoverage>>,
    #[serde(default)]
    pub preliminary_testing: Option<PreliminaryTesting>,
    #[serde(default)]
    pub assignee: Option<String>,
    /// Oldest first, as the tracker returns them.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Issue {
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// The issue's component when it has exactly one.
    #[must_use]
    pub fn single_component(&self) -> Option<&str> {
        match self.components.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_test_coverage(&self) -> bool {
        self.test_coverage
            .as_ref()
            .is_some_and(|coverage| !coverage.is_empty())
    }

    #[must_use]
    pub fn brief(&self) -> IssueBrief {
        IssueBrief {
            key: self.key.clone(),
            status: self.status,
            assignee: self.assignee.clone(),
        }
    }
}

/// Status and ownership of an issue, fetched in bulk for advisories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueBrief {
    pub key: String,
    pub status: IssueStatus,
    pub assignee: Option<String>,
}

/// Extract an issue key from either a bare key or a browse URL.
#[must_use]
pub fn issue_key_from_arg(arg: &str) -> String {
    let trimmed = arg.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
    } else {
        trimmed.to_string()
    }
}
