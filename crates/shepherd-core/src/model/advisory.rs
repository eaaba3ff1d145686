use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::wire_enum;

/// Status of an advisory in the release pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdvisoryStatus {
    NewFiles,
    Qe,
    RelPrep,
    PushReady,
    InPush,
    DroppedNoShip,
    ShippedLive,
}

wire_enum!(AdvisoryStatus, "advisory status", {
    NewFiles => "NEW_FILES",
    Qe => "QE",
    RelPrep => "REL_PREP",
    PushReady => "PUSH_READY",
    InPush => "IN_PUSH",
    DroppedNoShip => "DROPPED_NO_SHIP",
    ShippedLive => "SHIPPED_LIVE",
});

impl AdvisoryStatus {
    /// Statuses after which the advisory handler keeps going immediately.
    #[must_use]
    pub const fn continues_processing(self) -> bool {
        matches!(self, Self::NewFiles | Self::Qe)
    }
}

/// State of a push job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushStatus {
    Queued,
    Ready,
    Running,
    WaitingOnPub,
    PostPushProcessing,
    Complete,
    Failed,
}

wire_enum!(PushStatus, "push status", {
    Queued => "QUEUED",
    Ready => "READY",
    Running => "RUNNING",
    WaitingOnPub => "WAITING_ON_PUB",
    PostPushProcessing => "POST_PUSH_PROCESSING",
    Complete => "COMPLETE",
    Failed => "FAILED",
});

/// The most recent push of an advisory to the staging target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePush {
    pub id: u64,
    pub status: PushStatus,
    /// When the push last changed state; for a complete push, when it finished.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A releasable bundle of builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: u64,
    /// Full advisory name, e.g. `RHBA-2025:1234-01`.
    pub name: String,
    pub url: String,
    pub synopsis: String,
    pub status: AdvisoryStatus,
    #[serde(default)]
    pub issue_keys: Vec<String>,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub release_id: Option<u64>,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl Advisory {
    #[must_use]
    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owners.iter().any(|owner| owner == identity)
    }
}

/// One package build shipped in an advisory with its file listing.
///
/// `files` maps variant to architecture to the sorted file names shipped there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBuild {
    pub nvr: String,
    #[serde(default)]
    pub files: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// Package name to build, for one advisory.
pub type BuildManifest = BTreeMap<String, PackageBuild>;

/// Package name of an `name-version-release` string.
#[must_use]
pub fn package_of_nvr(nvr: &str) -> Option<&str> {
    let mut parts = nvr.rsplitn(3, '-');
    let _release = parts.next()?;
    let _version = parts.next()?;
    parts.next().filter(|name| !name.is_empty())
}

/// Extract an advisory id from a bare id or an advisory URL.
#[must_use]
pub fn advisory_id_from_arg(arg: &str) -> Option<u64> {
    arg.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
}
