use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use shepherd_core::model::{Advisory, Issue, TestingAnalysis};
use shepherd_core::services::TestingAnalyst;

use crate::http::JsonClient;

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    issue: &'a Issue,
    advisory: &'a Advisory,
    after_baseline: bool,
}

/// Testing analyst reached over a single JSON endpoint.
pub struct AnalystClient {
    http: JsonClient,
    url: String,
}

impl AnalystClient {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            http: JsonClient::new(url, None),
            url: url.to_string(),
        }
    }
}

impl TestingAnalyst for AnalystClient {
    fn analyze(
        &self,
        issue: &Issue,
        advisory: &Advisory,
        after_baseline: bool,
    ) -> Result<TestingAnalysis> {
        let analysis: TestingAnalysis = self
            .http
            .post_json(
                &self.url,
                &AnalysisRequest {
                    issue,
                    advisory,
                    after_baseline,
                },
            )
            .with_context(|| format!("analyze testing of {}", issue.key))?;
        debug!(issue = %issue.key, state = %analysis.state, "analysis received");
        Ok(analysis)
    }
}
