//! Collaborator contracts.
//!
//! The handlers only talk to the outside world through these traits. The CLI
//! implements them over HTTP; tests implement them in memory. Every method
//! reflects the collaborator's state at call time and none of them caches
//! anything the handlers rely on being fresh.

use anyhow::Result;

use crate::model::{
    Advisory, AdvisoryStatus, BuildManifest, Comment, Issue, IssueBrief, IssueStatus,
    MergeRequest, MergeRequestState, StagePush, TestRun, TestingAnalysis,
};
use crate::rules::TransitionRuleSet;

/// A file to attach to an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Fields of an issue the supervisor opens itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub project: String,
    pub summary: String,
    pub description: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
}

pub trait IssueTracker {
    /// Issues matching a tracker query, without comments.
    fn search_issues(&self, query: &str) -> Result<Vec<Issue>>;

    /// One issue with its comments, oldest first.
    fn get_issue(&self, key: &str) -> Result<Issue>;

    /// Current status and owner of each key, fetched fresh.
    fn issue_briefs(&self, keys: &[String]) -> Result<Vec<IssueBrief>>;

    /// Add `label` (if missing) and post `comment` alongside it.
    fn add_label(&self, key: &str, label: &str, comment: Option<&str>) -> Result<()>;

    fn remove_label(&self, key: &str, label: &str) -> Result<()>;

    fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    fn update_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<()>;

    /// Move the issue to `status`, carrying `comment` with the transition.
    ///
    /// Fails when the transition to `status` is unavailable or needs fields.
    fn change_status(&self, key: &str, status: IssueStatus, comment: &str) -> Result<()>;

    fn add_attachments(&self, key: &str, attachments: &[Attachment]) -> Result<()>;

    /// The open issue in `project` whose description carries `tag`,
    /// optionally also required to carry `with_label`.
    fn find_by_tag(&self, project: &str, tag: &str, with_label: Option<&str>)
    -> Result<Option<Issue>>;

    /// Returns the new issue's key.
    fn create_issue(&self, issue: &NewIssue) -> Result<String>;
}

pub trait AdvisoryTracker {
    fn get_advisory(&self, id: u64) -> Result<Advisory>;

    /// Gating rules for the advisory's next transition.
    fn transition_rules(&self, id: u64) -> Result<TransitionRuleSet>;

    /// The most recent push to the staging target, if any.
    fn latest_stage_push(&self, id: u64) -> Result<Option<StagePush>>;

    fn push_to_stage(&self, id: u64) -> Result<()>;

    fn refresh_security_alerts(&self, id: u64) -> Result<()>;

    fn change_status(&self, id: u64, status: AdvisoryStatus) -> Result<()>;

    fn build_manifest(&self, id: u64) -> Result<BuildManifest>;

    /// The most recently shipped advisory for `package` before `id`.
    fn previous_advisory(&self, id: u64, package: &str) -> Result<Option<Advisory>>;

    /// NVR of `package` as shipped in advisory `id`.
    fn build_nvr(&self, id: u64, package: &str) -> Result<Option<String>>;

    fn comments(&self, id: u64) -> Result<Vec<Comment>>;

    fn add_comment(&self, id: u64, body: &str) -> Result<()>;

    fn set_owner(&self, id: u64, identity: &str) -> Result<()>;
}

pub trait SourceHost {
    /// Merge requests in `project` whose text mentions `text`.
    fn search_merge_requests(
        &self,
        project: &str,
        text: &str,
        state: MergeRequestState,
    ) -> Result<Vec<MergeRequest>>;
}

pub trait TestService {
    fn get_run(&self, id: &str) -> Result<TestRun>;

    /// Submit a copy of `run` testing `build` instead.
    fn reproduce_with_build(&self, run: &TestRun, build: &str) -> Result<TestRun>;

    fn fetch_artifact(&self, url: &str) -> Result<String>;
}

pub trait TestingAnalyst {
    /// Judge the issue's final testing; `after_baseline` tells the analyst a
    /// reproduction table is available in the comments.
    fn analyze(
        &self,
        issue: &Issue,
        advisory: &Advisory,
        after_baseline: bool,
    ) -> Result<TestingAnalysis>;
}

/// Every collaborator a handler may call.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub issues: &'a dyn IssueTracker,
    pub advisories: &'a dyn AdvisoryTracker,
    pub source: &'a dyn SourceHost,
    pub tests: &'a dyn TestService,
    pub analyst: &'a dyn TestingAnalyst,
}
