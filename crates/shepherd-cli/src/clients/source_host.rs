use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use shepherd_core::model::{MergeRequest, MergeRequestState};
use shepherd_core::services::SourceHost;

use crate::http::JsonClient;

#[derive(Debug, Deserialize)]
struct RawMergeRequest {
    iid: u64,
    web_url: String,
    title: String,
    state: MergeRequestState,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
}

/// Project paths go into the URL as a single segment.
fn encode_project(project: &str) -> String {
    project.replace('/', "%2F")
}

pub struct SourceHostClient {
    http: JsonClient,
}

impl SourceHostClient {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            http: JsonClient::new(&format!("{}/api/v4", base_url.trim_end_matches('/')), token),
        }
    }
}

impl SourceHost for SourceHostClient {
    fn search_merge_requests(
        &self,
        project: &str,
        text: &str,
        state: MergeRequestState,
    ) -> Result<Vec<MergeRequest>> {
        let raw: Vec<RawMergeRequest> = self
            .http
            .get_json(
                &format!("projects/{}/merge_requests", encode_project(project)),
                &[("search", text), ("state", state.as_str())],
            )
            .with_context(|| format!("search merge requests of {project} for {text}"))?;
        Ok(raw
            .into_iter()
            .map(|mr| MergeRequest {
                project: project.to_string(),
                iid: mr.iid,
                url: mr.web_url,
                title: mr.title,
                state: mr.state,
                merged_at: mr.merged_at,
            })
            .collect())
    }
}
