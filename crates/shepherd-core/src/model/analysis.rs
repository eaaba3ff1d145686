use serde::{Deserialize, Serialize};

use super::wire_enum;

/// Verdict of the testing analyst on an issue's final testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestingState {
    NotRunning,
    Pending,
    Running,
    Failed,
    Passed,
    Waived,
}

wire_enum!(TestingState, "testing state", {
    NotRunning => "tests-not-running",
    Pending => "tests-pending",
    Running => "tests-running",
    Failed => "tests-failed",
    Passed => "tests-passed",
    Waived => "tests-waived",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestingAnalysis {
    pub state: TestingState,
    /// Explanation suitable for posting on the issue.
    #[serde(default)]
    pub comment: Option<String>,
    /// Test run ids that failed, when the analyst could identify them.
    #[serde(default)]
    pub failed_test_ids: Vec<String>,
}
