use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeRequestState {
    Opened,
    Closed,
    Locked,
    Merged,
}

wire_enum!(MergeRequestState, "merge request state", {
    Opened => "opened",
    Closed => "closed",
    Locked => "locked",
    Merged => "merged",
});

/// A merge request on the source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub project: String,
    pub iid: u64,
    pub url: String,
    pub title: String,
    pub state: MergeRequestState,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}
