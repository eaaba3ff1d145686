//! Find issues and advisories in flight and queue the ones not yet queued.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::handler::advisory_needs_attention;
use crate::handler::erratum::all_release_pending;
use crate::model::advisory::advisory_id_from_arg;
use crate::model::{Advisory, AdvisoryStatus, IssueBrief, IssueStatus, WorkItem};
use crate::queue::WorkQueue;
use crate::services::Services;

/// Where the collector looks.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Issue tracker query selecting the issues automation is driving.
    pub query: String,
    /// Project holding advisory escalation issues.
    pub attention_project: String,
}

/// Every work item that should currently be in the queue.
///
/// # Errors
///
/// Returns an error if a collaborator call fails.
pub fn collect_work_items(
    services: Services<'_>,
    settings: &CollectorSettings,
) -> Result<BTreeSet<WorkItem>> {
    info!("getting all relevant issues from the issue tracker");
    let issues = services
        .issues
        .search_issues(&settings.query)
        .context("search current issues")?;

    let mut items: BTreeSet<WorkItem> = issues
        .iter()
        .filter(|issue| issue.status != IssueStatus::ReleasePending)
        .map(|issue| WorkItem::issue(&issue.key))
        .collect();

    let mut advisory_ids = BTreeSet::new();
    for link in issues.iter().filter_map(|issue| issue.advisory_link.as_deref()) {
        match advisory_id_from_arg(link) {
            Some(id) => {
                advisory_ids.insert(id);
            }
            None => warn!(link, "advisory link does not name an advisory"),
        }
    }

    let mut known: BTreeMap<String, IssueBrief> = issues
        .iter()
        .map(|issue| (issue.key.clone(), issue.brief()))
        .collect();

    for id in advisory_ids {
        let advisory = services
            .advisories
            .get_advisory(id)
            .with_context(|| format!("fetch advisory {id}"))?;
        if advisory_ready(services, settings, &advisory, &mut known)? {
            items.insert(WorkItem::erratum(advisory.id));
        }
    }

    Ok(items)
}

fn advisory_ready(
    services: Services<'_>,
    settings: &CollectorSettings,
    advisory: &Advisory,
    known: &mut BTreeMap<String, IssueBrief>,
) -> Result<bool> {
    let status_ready = match advisory.status {
        AdvisoryStatus::NewFiles => true,
        AdvisoryStatus::Qe => {
            let missing: Vec<String> = advisory
                .issue_keys
                .iter()
                .filter(|key| !known.contains_key(*key))
                .cloned()
                .collect();
            if !missing.is_empty() {
                for brief in services.issues.issue_briefs(&missing)? {
                    known.insert(brief.key.clone(), brief);
                }
            }
            let briefs: Vec<IssueBrief> = advisory
                .issue_keys
                .iter()
                .filter_map(|key| known.get(key).cloned())
                .collect();
            all_release_pending(&advisory.issue_keys, &briefs)
        }
        _ => false,
    };

    if !status_ready {
        debug!(advisory = %advisory.name, status = %advisory.status, "advisory not ready");
        return Ok(false);
    }
    Ok(!advisory_needs_attention(
        services.issues,
        &settings.attention_project,
        advisory.id,
    )?)
}

/// Collect and queue every item not already queued. Returns the new items.
///
/// Items already queued keep their ready time.
///
/// # Errors
///
/// Returns an error if collection or queue access fails.
pub fn collect_and_schedule(
    queue: &WorkQueue,
    services: Services<'_>,
    settings: &CollectorSettings,
) -> Result<Vec<WorkItem>> {
    let wanted = collect_work_items(services, settings)?;
    let queued = queue.get_all_work_items()?;
    let fresh: Vec<WorkItem> = wanted.difference(&queued).cloned().collect();

    queue.schedule_work_items(&fresh, std::time::Duration::ZERO)?;
    for item in &fresh {
        info!(%item, "new work item");
    }
    info!(count = fresh.len(), "scheduled new work items");
    Ok(fresh)
}
