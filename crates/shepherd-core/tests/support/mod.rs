//! In-memory collaborators for handler tests.
//!
//! `World` implements every service trait over plain maps. Mutations are
//! applied to the maps and also appended to `log` so tests can assert on the
//! exact side effects a step performed.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use shepherd_core::handler::HandlerSettings;
use shepherd_core::model::test_run::TmtSettings;
use shepherd_core::model::{
    Advisory, AdvisoryStatus, BuildManifest, Comment, Issue, IssueBrief, IssueStatus,
    MergeRequest, MergeRequestState, PreliminaryTesting, StagePush, TestCoverage,
    TestEnvironment, TestRun, TestRunResult, TestRunState, TestingAnalysis,
};
use shepherd_core::rules::TransitionRuleSet;
use shepherd_core::services::{
    AdvisoryTracker, Attachment, IssueTracker, NewIssue, Services, SourceHost, TestService,
    TestingAnalyst,
};

pub const BOT: &str = "shepherd-bot";
pub const ADVISORY_ID: u64 = 100;
pub const ADVISORY_LINK: &str = "https://advisories.example.com/advisory/100";

#[derive(Default)]
pub struct World {
    pub issues: RefCell<BTreeMap<String, Issue>>,
    /// Status text as the tracker reports it, decoded on every fetch.
    pub raw_statuses: RefCell<BTreeMap<String, String>>,
    pub descriptions: RefCell<BTreeMap<String, String>>,
    pub attachments: RefCell<Vec<(String, Attachment)>>,
    pub advisories: RefCell<BTreeMap<u64, Advisory>>,
    pub rules: RefCell<BTreeMap<u64, TransitionRuleSet>>,
    pub pushes: RefCell<BTreeMap<u64, StagePush>>,
    pub manifests: RefCell<BTreeMap<u64, BuildManifest>>,
    pub previous: RefCell<BTreeMap<(u64, String), u64>>,
    pub advisory_comments: RefCell<BTreeMap<u64, Vec<Comment>>>,
    pub merge_requests: RefCell<BTreeMap<String, Vec<MergeRequest>>>,
    pub runs: RefCell<BTreeMap<String, TestRun>>,
    pub artifacts: RefCell<BTreeMap<String, String>>,
    pub analysis: RefCell<Option<TestingAnalysis>>,
    pub analyst_calls: RefCell<Vec<bool>>,
    pub log: RefCell<Vec<String>>,
    next_id: Cell<u32>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            issues: self,
            advisories: self,
            source: self,
            tests: self,
            analyst: self,
        }
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }

    fn next(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn logged(&self, prefix: &str) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn issue(&self, key: &str) -> Issue {
        self.issues.borrow()[key].clone()
    }

    pub fn put_issue(&self, issue: Issue) {
        self.issues.borrow_mut().insert(issue.key.clone(), issue);
    }

    pub fn put_advisory(&self, advisory: Advisory) {
        self.advisories.borrow_mut().insert(advisory.id, advisory);
    }

    pub fn put_run(&self, run: TestRun) {
        self.runs.borrow_mut().insert(run.id.clone(), run);
    }

    pub fn set_analysis(&self, analysis: TestingAnalysis) {
        *self.analysis.borrow_mut() = Some(analysis);
    }

    /// Open an issue in the attention project carrying `description`.
    pub fn put_tracking_issue(&self, key: &str, description: &str, labels: &[&str]) {
        let mut issue = issue(key);
        issue.components.clear();
        issue.labels = labels.iter().map(|label| (*label).to_string()).collect();
        self.put_issue(issue);
        self.descriptions
            .borrow_mut()
            .insert(key.to_string(), description.to_string());
    }

    fn comment(&self, body: &str) -> Comment {
        Comment {
            id: format!("c{}", self.next()),
            author: BOT.to_string(),
            created: Utc::now(),
            body: body.to_string(),
        }
    }

    fn with_issue<T>(&self, key: &str, f: impl FnOnce(&mut Issue) -> T) -> Result<T> {
        let mut issues = self.issues.borrow_mut();
        let issue = issues
            .get_mut(key)
            .with_context(|| format!("no issue {key}"))?;
        Ok(f(issue))
    }
}

impl IssueTracker for World {
    fn search_issues(&self, _query: &str) -> Result<Vec<Issue>> {
        Ok(self
            .issues
            .borrow()
            .values()
            .filter(|issue| issue.key.starts_with("RHEL-"))
            .cloned()
            .collect())
    }

    fn get_issue(&self, key: &str) -> Result<Issue> {
        let mut issue = self
            .issues
            .borrow()
            .get(key)
            .cloned()
            .with_context(|| format!("no issue {key}"))?;
        if let Some(raw) = self.raw_statuses.borrow().get(key) {
            issue.status = raw
                .parse::<IssueStatus>()
                .with_context(|| format!("issue {key} status"))?;
        }
        Ok(issue)
    }

    fn issue_briefs(&self, keys: &[String]) -> Result<Vec<IssueBrief>> {
        let issues = self.issues.borrow();
        Ok(keys
            .iter()
            .filter_map(|key| issues.get(key).map(Issue::brief))
            .collect())
    }

    fn add_label(&self, key: &str, label: &str, comment: Option<&str>) -> Result<()> {
        self.record(format!("add_label {key} {label}"));
        let comment = comment.map(|body| self.comment(body));
        self.with_issue(key, |issue| {
            issue.labels.insert(label.to_string());
            issue.comments.extend(comment);
        })
    }

    fn remove_label(&self, key: &str, label: &str) -> Result<()> {
        self.record(format!("remove_label {key} {label}"));
        self.with_issue(key, |issue| {
            issue.labels.remove(label);
        })
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        self.record(format!("add_comment {key}"));
        let comment = self.comment(body);
        self.with_issue(key, |issue| issue.comments.push(comment))
    }

    fn update_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<()> {
        self.record(format!("update_comment {key} {comment_id}"));
        self.with_issue(key, |issue| {
            if let Some(comment) = issue.comments.iter_mut().find(|c| c.id == comment_id) {
                comment.body = body.to_string();
            }
        })
    }

    fn change_status(&self, key: &str, status: IssueStatus, comment: &str) -> Result<()> {
        self.record(format!("change_status {key} {status}"));
        let comment = self.comment(comment);
        self.with_issue(key, |issue| {
            issue.status = status;
            issue.comments.push(comment);
        })
    }

    fn add_attachments(&self, key: &str, attachments: &[Attachment]) -> Result<()> {
        for attachment in attachments {
            self.record(format!("attach {key} {}", attachment.name));
            self.attachments
                .borrow_mut()
                .push((key.to_string(), attachment.clone()));
        }
        Ok(())
    }

    fn find_by_tag(
        &self,
        project: &str,
        tag: &str,
        with_label: Option<&str>,
    ) -> Result<Option<Issue>> {
        let descriptions = self.descriptions.borrow();
        let issues = self.issues.borrow();
        Ok(issues
            .values()
            .filter(|issue| issue.key.starts_with(&format!("{project}-")))
            .filter(|issue| issue.status != IssueStatus::Closed)
            .filter(|issue| {
                descriptions
                    .get(&issue.key)
                    .is_some_and(|description| description.contains(tag))
            })
            .find(|issue| with_label.is_none_or(|label| issue.has_label(label)))
            .cloned())
    }

    fn create_issue(&self, new: &NewIssue) -> Result<String> {
        let key = format!("{}-{}", new.project, self.next());
        self.record(format!("create_issue {key} {}", new.summary));
        let labels: Vec<&str> = new.labels.iter().map(String::as_str).collect();
        self.put_tracking_issue(&key, &new.description, &labels);
        Ok(key)
    }
}

impl AdvisoryTracker for World {
    fn get_advisory(&self, id: u64) -> Result<Advisory> {
        self.advisories
            .borrow()
            .get(&id)
            .cloned()
            .with_context(|| format!("no advisory {id}"))
    }

    fn transition_rules(&self, id: u64) -> Result<TransitionRuleSet> {
        self.rules
            .borrow()
            .get(&id)
            .cloned()
            .with_context(|| format!("no rules for {id}"))
    }

    fn latest_stage_push(&self, id: u64) -> Result<Option<StagePush>> {
        Ok(self.pushes.borrow().get(&id).cloned())
    }

    fn push_to_stage(&self, id: u64) -> Result<()> {
        self.record(format!("push_to_stage {id}"));
        self.pushes.borrow_mut().insert(id, StagePush {
            id: u64::from(self.next()),
            status: shepherd_core::model::PushStatus::Queued,
            updated_at: None,
        });
        Ok(())
    }

    fn refresh_security_alerts(&self, id: u64) -> Result<()> {
        self.record(format!("refresh_security_alerts {id}"));
        Ok(())
    }

    fn change_status(&self, id: u64, status: AdvisoryStatus) -> Result<()> {
        self.record(format!("advisory_status {id} {status}"));
        if let Some(advisory) = self.advisories.borrow_mut().get_mut(&id) {
            advisory.status = status;
        }
        Ok(())
    }

    fn build_manifest(&self, id: u64) -> Result<BuildManifest> {
        Ok(self.manifests.borrow().get(&id).cloned().unwrap_or_default())
    }

    fn previous_advisory(&self, id: u64, package: &str) -> Result<Option<Advisory>> {
        let previous = self
            .previous
            .borrow()
            .get(&(id, package.to_string()))
            .copied();
        previous.map(|prev| self.get_advisory(prev)).transpose()
    }

    fn build_nvr(&self, id: u64, package: &str) -> Result<Option<String>> {
        Ok(self
            .manifests
            .borrow()
            .get(&id)
            .and_then(|manifest| manifest.get(package))
            .map(|build| build.nvr.clone()))
    }

    fn comments(&self, id: u64) -> Result<Vec<Comment>> {
        Ok(self
            .advisory_comments
            .borrow()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn add_comment(&self, id: u64, body: &str) -> Result<()> {
        self.record(format!("advisory_comment {id}"));
        let comment = self.comment(body);
        self.advisory_comments
            .borrow_mut()
            .entry(id)
            .or_default()
            .push(comment);
        Ok(())
    }

    fn set_owner(&self, id: u64, identity: &str) -> Result<()> {
        self.record(format!("set_owner {id} {identity}"));
        if let Some(advisory) = self.advisories.borrow_mut().get_mut(&id) {
            advisory.owners.push(identity.to_string());
        }
        Ok(())
    }
}

impl SourceHost for World {
    fn search_merge_requests(
        &self,
        project: &str,
        _text: &str,
        state: MergeRequestState,
    ) -> Result<Vec<MergeRequest>> {
        Ok(self
            .merge_requests
            .borrow()
            .get(project)
            .map(|mrs| mrs.iter().filter(|mr| mr.state == state).cloned().collect())
            .unwrap_or_default())
    }
}

impl TestService for World {
    fn get_run(&self, id: &str) -> Result<TestRun> {
        self.runs
            .borrow()
            .get(id)
            .cloned()
            .with_context(|| format!("no test run {id}"))
    }

    fn reproduce_with_build(&self, run: &TestRun, build: &str) -> Result<TestRun> {
        self.record(format!("reproduce {} {build}", run.id));
        let request = run.reproduction_with_build(build);
        let id = format!("repro-{}", self.next());
        let reproduction = TestRun {
            id: id.clone(),
            url: format!("https://tests.example.com/requests/{id}"),
            state: TestRunState::Queued,
            result: TestRunResult::Unknown,
            result_artifact_url: None,
            environments: request.environments,
            test: request.test,
        };
        self.put_run(reproduction.clone());
        Ok(reproduction)
    }

    fn fetch_artifact(&self, url: &str) -> Result<String> {
        self.artifacts
            .borrow()
            .get(url)
            .cloned()
            .with_context(|| format!("no artifact at {url}"))
    }
}

impl TestingAnalyst for World {
    fn analyze(
        &self,
        _issue: &Issue,
        _advisory: &Advisory,
        after_baseline: bool,
    ) -> Result<TestingAnalysis> {
        self.analyst_calls.borrow_mut().push(after_baseline);
        self.analysis
            .borrow()
            .clone()
            .context("no analysis configured")
    }
}

pub fn settings() -> HandlerSettings {
    HandlerSettings::default()
}

/// A bare issue: one component, no advisory, no automation labels.
pub fn issue(key: &str) -> Issue {
    Issue {
        key: key.to_string(),
        url: format!("https://issues.example.com/browse/{key}"),
        summary: "podman fails to start".to_string(),
        status: IssueStatus::InProgress,
        labels: BTreeSet::new(),
        components: vec!["podman".to_string()],
        advisory_link: None,
        fixed_in_build: None,
        test_coverage: None,
        preliminary_testing: None,
        assignee: Some(BOT.to_string()),
        comments: Vec::new(),
    }
}

/// An issue with an advisory and every post-advisory precondition met.
pub fn ready_issue(key: &str, status: IssueStatus) -> Issue {
    let mut issue = issue(key);
    issue.status = status;
    issue.advisory_link = Some(ADVISORY_LINK.to_string());
    issue.fixed_in_build = Some("podman-5.2.2-2.el9".to_string());
    issue.preliminary_testing = Some(PreliminaryTesting::Pass);
    issue.test_coverage = Some(vec![TestCoverage::Automated]);
    issue.labels = [
        shepherd_core::model::labels::BACKPORTED,
        shepherd_core::model::labels::MERGED,
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    issue
}

pub fn advisory(id: u64, status: AdvisoryStatus, issue_keys: &[&str]) -> Advisory {
    Advisory {
        id,
        name: format!("RHBA-2025:{id}-01"),
        url: format!("https://advisories.example.com/advisory/{id}"),
        synopsis: "podman bug fix update".to_string(),
        status,
        issue_keys: issue_keys.iter().map(|key| (*key).to_string()).collect(),
        owners: vec![BOT.to_string()],
        release_id: Some(7),
        publish_date: None,
        status_updated_at: None,
    }
}

pub fn merged_mr(project: &str, merged_at: DateTime<Utc>) -> MergeRequest {
    MergeRequest {
        project: project.to_string(),
        iid: 12,
        url: format!("https://source.example.com/{project}/-/merge_requests/12"),
        title: "Fix RHEL-1".to_string(),
        state: MergeRequestState::Merged,
        merged_at: Some(merged_at),
    }
}

pub fn test_run(id: &str, build: &str, state: TestRunState, result: TestRunResult) -> TestRun {
    TestRun {
        id: id.to_string(),
        url: format!("https://tests.example.com/requests/{id}"),
        state,
        result,
        result_artifact_url: None,
        environments: vec![TestEnvironment {
            arch: "x86_64".to_string(),
            os: serde_json::json!({"compose": "RHEL-9.6.0-Nightly"}),
            variables: BTreeMap::from([("BUILDS".to_string(), build.to_string())]),
            tmt: TmtSettings {
                context: BTreeMap::from([
                    ("distro".to_string(), Value::from("rhel-9.6")),
                    ("newa_batch".to_string(), Value::from("b1")),
                ]),
            },
        }],
        test: serde_json::json!({"fmf": {"url": "https://git.example.com/tests", "ref": "main"}}),
    }
}

/// A one-suite xunit document for `plan` on x86_64.
pub fn xunit(cases: &[(&str, &str)]) -> String {
    let cases: String = cases
        .iter()
        .map(|(name, outcome)| {
            let marker = match *outcome {
                "fail" => "<failure/>",
                "error" => "<error/>",
                "skip" => "<skipped/>",
                _ => "",
            };
            format!(
                r#"<testcase name="{name}"><fmf-id url="https://git.example.com/tests" ref="main"/>{marker}</testcase>"#
            )
        })
        .collect();
    format!(
        r#"<testsuites><testsuite name="/plans/tier1"><testing-environment name="provisioned"><property name="arch" value="x86_64"/></testing-environment>{cases}</testsuite></testsuites>"#
    )
}
