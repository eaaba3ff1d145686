//! Test-execution service: fetch runs, start reproductions, read artifacts.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use tracing::{debug, info};

use shepherd_core::model::{TestEnvironment, TestRun, TestRunResult, TestRunState};
use shepherd_core::services::TestService;

use crate::http::JsonClient;

#[derive(Debug, Default, Deserialize)]
struct RawResult {
    #[serde(default)]
    overall: Option<TestRunResult>,
    #[serde(default)]
    xunit_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    id: String,
    state: TestRunState,
    #[serde(default)]
    result: Option<RawResult>,
    #[serde(default)]
    test: Value,
    #[serde(default, alias = "environments")]
    environments_requested: Vec<TestEnvironment>,
}

impl RawRun {
    fn into_run(self, base_url: &str) -> TestRun {
        let result = self.result.unwrap_or_default();
        TestRun {
            url: format!("{base_url}/requests/{}", self.id),
            id: self.id,
            state: self.state,
            result: result.overall.unwrap_or(TestRunResult::Unknown),
            result_artifact_url: result.xunit_url,
            environments: self.environments_requested,
            test: self.test,
        }
    }
}

pub struct TestServiceClient {
    http: JsonClient,
    base_url: String,
    dry_run: bool,
    /// Runs faked by dry-run reproductions, so later lookups find them.
    fake_runs: RefCell<HashMap<String, TestRun>>,
    fake_counter: Cell<u64>,
}

impl TestServiceClient {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>, dry_run: bool) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http: JsonClient::new(&base_url, token),
            base_url,
            dry_run,
            fake_runs: RefCell::new(HashMap::new()),
            fake_counter: Cell::new(0),
        }
    }
}

impl TestService for TestServiceClient {
    fn get_run(&self, id: &str) -> Result<TestRun> {
        if let Some(fake) = self.fake_runs.borrow().get(id) {
            return Ok(fake.clone());
        }
        let raw: RawRun = self
            .http
            .get_json(&format!("requests/{id}"), &[])
            .with_context(|| format!("fetch test run {id}"))?;
        Ok(raw.into_run(&self.base_url))
    }

    fn reproduce_with_build(&self, run: &TestRun, build: &str) -> Result<TestRun> {
        let request = run.reproduction_with_build(build);
        if self.dry_run {
            let n = self.fake_counter.get() + 1;
            self.fake_counter.set(n);
            let id = format!("dry-run-{n}");
            info!("Dry run: would reproduce test run {} with build {build}", run.id);
            let body = serde_json::to_string(&request).unwrap_or_default();
            debug!(body = %body, "dry run request");
            let fake = TestRun {
                url: format!("{}/requests/{id}", self.base_url),
                id: id.clone(),
                state: TestRunState::New,
                result: TestRunResult::Unknown,
                result_artifact_url: None,
                environments: request.environments,
                test: request.test,
            };
            self.fake_runs.borrow_mut().insert(id, fake.clone());
            return Ok(fake);
        }
        let raw: RawRun = self
            .http
            .post_json("requests", &request)
            .with_context(|| format!("reproduce test run {} with {build}", run.id))?;
        let started = raw.into_run(&self.base_url);
        info!(original = %run.id, reproduction = %started.id, build, "started reproduction");
        Ok(started)
    }

    fn fetch_artifact(&self, url: &str) -> Result<String> {
        self.http.get_text(url)
    }
}
