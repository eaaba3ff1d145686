use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::wire_enum;

/// Environment variable carrying the build under test.
pub const BUILDS_VARIABLE: &str = "BUILDS";

/// Context keys with this prefix belong to the original run's orchestration and
/// are dropped from reproductions.
const ORCHESTRATION_CONTEXT_PREFIX: &str = "newa_";

/// Lifecycle state of a test run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestRunState {
    New,
    Queued,
    Running,
    Error,
    Canceled,
    CancelRequested,
    Complete,
}

wire_enum!(TestRunState, "test run state", {
    New => "new",
    Queued => "queued",
    Running => "running",
    Error => "error",
    Canceled => "canceled",
    CancelRequested => "cancel-requested",
    Complete => "complete",
});

impl TestRunState {
    /// The run will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Canceled)
    }
}

/// Overall result of a completed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestRunResult {
    Passed,
    Failed,
    Skipped,
    Unknown,
    Error,
}

wire_enum!(TestRunResult, "test run result", {
    Passed => "passed",
    Failed => "failed",
    Skipped => "skipped",
    Unknown => "unknown",
    Error => "error",
});

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TmtSettings {
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// One requested environment of a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEnvironment {
    pub arch: String,
    #[serde(default)]
    pub os: Value,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub tmt: TmtSettings,
}

/// A test run on the test-execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub url: String,
    pub state: TestRunState,
    pub result: TestRunResult,
    #[serde(default)]
    pub result_artifact_url: Option<String>,
    #[serde(default)]
    pub environments: Vec<TestEnvironment>,
    /// Test definition, passed through untouched when cloning.
    #[serde(default)]
    pub test: Value,
}

impl TestRun {
    #[must_use]
    pub fn arches(&self) -> Vec<String> {
        self.environments.iter().map(|env| env.arch.clone()).collect()
    }

    /// The single build every environment tests, if there is exactly one.
    #[must_use]
    pub fn build_under_test(&self) -> Option<&str> {
        let mut builds = self
            .environments
            .iter()
            .filter_map(|env| env.variables.get(BUILDS_VARIABLE).map(String::as_str));
        let first = builds.next()?;
        builds.all(|build| build == first).then_some(first)
    }

    /// Text for the state/result column of a reproduction table.
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        if self.state == TestRunState::Complete {
            self.result.as_str()
        } else {
            self.state.as_str()
        }
    }

    /// Request body for a run identical to this one except for the build.
    #[must_use]
    pub fn reproduction_with_build(&self, build: &str) -> ReproductionRequest {
        let environments = self
            .environments
            .iter()
            .map(|env| {
                let mut variables = env.variables.clone();
                variables.insert(BUILDS_VARIABLE.to_string(), build.to_string());
                TestEnvironment {
                    arch: env.arch.clone(),
                    os: env.os.clone(),
                    variables,
                    tmt: TmtSettings {
                        context: env
                            .tmt
                            .context
                            .iter()
                            .filter(|(key, _)| !key.starts_with(ORCHESTRATION_CONTEXT_PREFIX))
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect(),
                    },
                }
            })
            .collect();

        ReproductionRequest {
            test: self.test.clone(),
            environments,
        }
    }
}

/// Body submitted to start a reproduction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproductionRequest {
    pub test: Value,
    pub environments: Vec<TestEnvironment>,
}
