//! `shepherd.toml` configuration and environment credentials.
//!
//! Lookup order: an explicit `--config` path, then `./shepherd.toml`, then
//! `<user config dir>/shepherd/config.toml`. A missing file means defaults.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CodedError, ErrorCode};
use crate::handler::HandlerSettings;

/// Overrides `queue.db_path` when set.
pub const QUEUE_DB_ENV: &str = "SHEPHERD_QUEUE_DB";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
    #[serde(default)]
    pub advisories: AdvisoriesConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub analyst: AnalystConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            poll_interval_secs: default_poll_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesConfig {
    #[serde(default = "default_issues_url")]
    pub base_url: String,
    /// Query the collector runs to find issues in flight.
    #[serde(default = "default_collector_query")]
    pub collector_query: String,
    #[serde(default = "default_attention_project")]
    pub attention_project: String,
    #[serde(default = "default_automation_identity")]
    pub automation_identity: String,
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            base_url: default_issues_url(),
            collector_query: default_collector_query(),
            attention_project: default_attention_project(),
            automation_identity: default_automation_identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoriesConfig {
    #[serde(default = "default_advisories_url")]
    pub base_url: String,
}

impl Default for AdvisoriesConfig {
    fn default() -> Self {
        Self {
            base_url: default_advisories_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub base_url: String,
    /// Groups searched as `<group>/<component>`.
    #[serde(default = "default_source_groups")]
    pub groups: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            groups: default_source_groups(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default = "default_tests_url")]
    pub base_url: String,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tests_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystConfig {
    #[serde(default = "default_analyst_url")]
    pub url: String,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            url: default_analyst_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_wait_delay_secs")]
    pub wait_delay_secs: u64,
    #[serde(default = "default_unmerged_delay_secs")]
    pub unmerged_delay_secs: u64,
    #[serde(default = "default_merged_wait_secs")]
    pub merged_wait_secs: u64,
    #[serde(default = "default_merge_grace_secs")]
    pub merge_grace_secs: u64,
    #[serde(default = "default_post_push_testing_timeout_secs")]
    pub post_push_testing_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wait_delay_secs: default_wait_delay_secs(),
            unmerged_delay_secs: default_unmerged_delay_secs(),
            merged_wait_secs: default_merged_wait_secs(),
            merge_grace_secs: default_merge_grace_secs(),
            post_push_testing_timeout_secs: default_post_push_testing_timeout_secs(),
        }
    }
}

impl SupervisorConfig {
    /// Handler policy derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured duration does not fit a time delta.
    pub fn handler_settings(&self, ignore_needs_attention: bool) -> Result<HandlerSettings> {
        let timing = &self.timing;
        Ok(HandlerSettings {
            ignore_needs_attention,
            automation_identity: self.issues.automation_identity.clone(),
            attention_project: self.issues.attention_project.clone(),
            source_groups: self.source.groups.clone(),
            wait_delay: seconds("timing.wait_delay_secs", timing.wait_delay_secs)?,
            unmerged_delay: seconds("timing.unmerged_delay_secs", timing.unmerged_delay_secs)?,
            merged_wait: seconds("timing.merged_wait_secs", timing.merged_wait_secs)?,
            merge_grace: seconds("timing.merge_grace_secs", timing.merge_grace_secs)?,
            post_push_testing_timeout: seconds(
                "timing.post_push_testing_timeout_secs",
                timing.post_push_testing_timeout_secs,
            )?,
        })
    }
}

fn seconds(field: &str, secs: u64) -> Result<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .with_context(|| format!("{field} = {secs} is out of range"))
}

/// Load the configuration, honouring the lookup order.
///
/// # Errors
///
/// Returns an error if an explicit path is missing or any file found fails
/// to parse.
pub fn load_config(explicit: Option<&Path>) -> Result<SupervisorConfig> {
    let mut config = if let Some(path) = explicit {
        read_config(path)?
    } else {
        let candidates = [
            Some(PathBuf::from("shepherd.toml")),
            dirs::config_dir().map(|dir| dir.join("shepherd/config.toml")),
        ];
        match candidates.into_iter().flatten().find(|path| path.exists()) {
            Some(path) => read_config(&path)?,
            None => SupervisorConfig::default(),
        }
    };

    if let Some(path) = env::var_os(QUEUE_DB_ENV).filter(|value| !value.is_empty()) {
        config.queue.db_path = PathBuf::from(path);
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<SupervisorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<SupervisorConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// A bearer token some command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    IssueTracker,
    SourceHost,
    TestService,
    AdvisoryTracker,
}

impl Token {
    pub const ALL: [Self; 4] = [
        Self::IssueTracker,
        Self::SourceHost,
        Self::TestService,
        Self::AdvisoryTracker,
    ];

    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::IssueTracker => "ISSUE_TRACKER_TOKEN",
            Self::SourceHost => "SOURCE_HOST_TOKEN",
            Self::TestService => "TEST_SERVICE_TOKEN",
            Self::AdvisoryTracker => "ADVISORY_TRACKER_TOKEN",
        }
    }
}

/// Tokens read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub issue_tracker: Option<String>,
    pub source_host: Option<String>,
    pub test_service: Option<String>,
    pub advisory_tracker: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable lookup; blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |token: Token| lookup(token.env_var()).filter(|value| !value.trim().is_empty());
        Self {
            issue_tracker: read(Token::IssueTracker),
            source_host: read(Token::SourceHost),
            test_service: read(Token::TestService),
            advisory_tracker: read(Token::AdvisoryTracker),
        }
    }

    #[must_use]
    pub fn get(&self, token: Token) -> Option<&str> {
        match token {
            Token::IssueTracker => self.issue_tracker.as_deref(),
            Token::SourceHost => self.source_host.as_deref(),
            Token::TestService => self.test_service.as_deref(),
            Token::AdvisoryTracker => self.advisory_tracker.as_deref(),
        }
    }

    /// Fail naming every token in `needed` that is not set.
    ///
    /// # Errors
    ///
    /// Returns a [`CodedError`] with [`ErrorCode::MissingCredentials`].
    pub fn require(&self, needed: &[Token]) -> Result<()> {
        let missing: Vec<&str> = needed
            .iter()
            .filter(|token| self.get(**token).is_none())
            .map(|token| token.env_var())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(CodedError::new(
            ErrorCode::MissingCredentials,
            format!("missing credentials: {}", missing.join(", ")),
        )
        .into())
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from(".shepherd/queue.db"),
        |dir| dir.join("shepherd/queue.db"),
    )
}

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_retry_delay_secs() -> u64 {
    15 * 60
}

fn default_issues_url() -> String {
    "https://issues.example.com".to_string()
}

fn default_collector_query() -> String {
    "project = RHEL AND assignee = currentUser() \
     AND status in ('New', 'In Progress', 'Integration', 'Release Pending') \
     AND 'Errata Link' is not EMPTY \
     AND labels != shepherd_needs_attention"
        .to_string()
}

fn default_attention_project() -> String {
    "RELMISC".to_string()
}

fn default_automation_identity() -> String {
    "shepherd-bot".to_string()
}

fn default_advisories_url() -> String {
    "https://advisories.example.com".to_string()
}

fn default_source_url() -> String {
    "https://source.example.com".to_string()
}

fn default_source_groups() -> Vec<String> {
    vec!["rhel/rpms".to_string(), "centos-stream/rpms".to_string()]
}

fn default_tests_url() -> String {
    "https://tests.example.com".to_string()
}

fn default_analyst_url() -> String {
    "http://localhost:8080/analyze".to_string()
}

const fn default_wait_delay_secs() -> u64 {
    20 * 60
}

const fn default_unmerged_delay_secs() -> u64 {
    3 * 60 * 60
}

const fn default_merged_wait_secs() -> u64 {
    60 * 60
}

const fn default_merge_grace_secs() -> u64 {
    24 * 60 * 60
}

const fn default_post_push_testing_timeout_secs() -> u64 {
    3 * 60 * 60
}
