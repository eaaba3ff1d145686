//! One dispatch step for a work item.
//!
//! Handlers re-read everything they need from the collaborators, decide one
//! step, perform it, and report how long until the item should be looked at
//! again. They never sleep; waiting is a positive reschedule.

pub mod erratum;
pub mod issue;

pub use erratum::{ErratumHandler, advisory_needs_attention, needs_attention_tag};
pub use issue::IssueHandler;

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

use crate::services::Services;

/// Outcome of one handler step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowResult {
    /// Human-readable account of what was decided.
    pub status: String,
    /// Seconds until the item is ready again; negative removes it for good.
    pub reschedule_in: i64,
}

impl WorkflowResult {
    /// Drop the item from the queue.
    pub fn remove(why: impl Into<String>) -> Self {
        Self {
            status: why.into(),
            reschedule_in: -1,
        }
    }

    /// Look again after `delay`.
    pub fn wait_for(why: impl Into<String>, delay: TimeDelta) -> Self {
        Self {
            status: why.into(),
            reschedule_in: delay.num_seconds().max(0),
        }
    }

    /// Look again right away.
    pub fn now(why: impl Into<String>) -> Self {
        Self {
            status: why.into(),
            reschedule_in: 0,
        }
    }

    #[must_use]
    pub const fn is_removal(&self) -> bool {
        self.reschedule_in < 0
    }
}

impl fmt::Display for WorkflowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_removal() {
            write!(f, "{} (removed)", self.status)
        } else {
            write!(f, "{} (again in {}s)", self.status, self.reschedule_in)
        }
    }
}

/// Policy knobs shared by both handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Process items even when they carry the needs-attention marker.
    pub ignore_needs_attention: bool,
    /// Identity that owns advisories and issues handled by automation.
    pub automation_identity: String,
    /// Project where advisory escalations are filed.
    pub attention_project: String,
    /// Source-host groups searched as `<group>/<component>`.
    pub source_groups: Vec<String>,
    /// Default wait between polls of slow external work.
    pub wait_delay: TimeDelta,
    /// Wait while no merge request has been merged.
    pub unmerged_delay: TimeDelta,
    /// Wait after a merge for the advisory to appear.
    pub merged_wait: TimeDelta,
    /// How long after a merge a missing advisory is tolerated.
    pub merge_grace: TimeDelta,
    /// How long after a stage push post-push tests may take.
    pub post_push_testing_timeout: TimeDelta,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            ignore_needs_attention: false,
            automation_identity: "shepherd-bot".to_string(),
            attention_project: "RELMISC".to_string(),
            source_groups: vec!["rhel/rpms".to_string(), "centos-stream/rpms".to_string()],
            wait_delay: TimeDelta::minutes(20),
            unmerged_delay: TimeDelta::hours(3),
            merged_wait: TimeDelta::hours(1),
            merge_grace: TimeDelta::hours(24),
            post_push_testing_timeout: TimeDelta::hours(3),
        }
    }
}

/// Everything a handler step runs against.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub services: Services<'a>,
    pub settings: &'a HandlerSettings,
    /// Clock reading for this dispatch.
    pub now: DateTime<Utc>,
}

impl HandlerContext<'_> {
    fn wait(&self, why: impl Into<String>) -> WorkflowResult {
        WorkflowResult::wait_for(why, self.settings.wait_delay)
    }
}

/// Human-friendly rendering of a duration for escalation messages.
fn describe(delta: TimeDelta) -> String {
    let hours = delta.num_hours();
    if hours > 0 && delta == TimeDelta::hours(hours) {
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    } else {
        format!("{} minutes", delta.num_minutes())
    }
}
