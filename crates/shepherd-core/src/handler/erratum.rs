use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{HandlerContext, WorkflowResult, describe};
use crate::model::{
    Advisory, AdvisoryStatus, IssueBrief, IssueStatus, PackageBuild, PushStatus, labels,
};
use crate::rules::{Remedy, first_remedy};
use crate::services::{IssueTracker, NewIssue};

/// Tag placed in the description of the issue tracking human work on an
/// advisory.
#[must_use]
pub fn needs_attention_tag(advisory_id: u64) -> String {
    format!("::: SHEPHERD needs_attention E: {advisory_id} :::")
}

/// Whether an open, labelled tracking issue exists for the advisory.
///
/// # Errors
///
/// Returns an error if the tracker search fails.
pub fn advisory_needs_attention(
    issues: &dyn IssueTracker,
    project: &str,
    advisory_id: u64,
) -> Result<bool> {
    Ok(issues
        .find_by_tag(
            project,
            &needs_attention_tag(advisory_id),
            Some(labels::NEEDS_ATTENTION),
        )?
        .is_some())
}

/// Marker comment recording that a build's product listings were checked.
#[must_use]
pub fn product_listings_marker(nvr: &str) -> String {
    format!("shepherd-product-listings-checked({nvr})")
}

/// Whether every key has a fresh brief in Release Pending.
#[must_use]
pub fn all_release_pending(keys: &[String], briefs: &[IssueBrief]) -> bool {
    keys.iter().all(|key| {
        briefs
            .iter()
            .any(|brief| &brief.key == key && brief.status == IssueStatus::ReleasePending)
    })
}

/// Moves one advisory a single step through its lifecycle.
pub struct ErratumHandler<'a> {
    ctx: HandlerContext<'a>,
    advisory: Advisory,
}

impl<'a> ErratumHandler<'a> {
    #[must_use]
    pub const fn new(ctx: HandlerContext<'a>, advisory: Advisory) -> Self {
        Self { ctx, advisory }
    }

    /// Run one step.
    ///
    /// # Errors
    ///
    /// Returns an error when a collaborator call fails. Policy problems are
    /// escalated to a tracking issue instead.
    pub fn run(self) -> Result<WorkflowResult> {
        let settings = self.ctx.settings;
        info!(
            advisory = %self.advisory.name,
            url = %self.advisory.url,
            status = %self.advisory.status,
            "running advisory workflow"
        );

        if !settings.ignore_needs_attention
            && advisory_needs_attention(
                self.ctx.services.issues,
                &settings.attention_project,
                self.advisory.id,
            )?
        {
            return Ok(WorkflowResult::remove(
                "Advisory already flagged for human attention",
            ));
        }

        if !self.advisory.status.continues_processing() {
            return Ok(WorkflowResult::remove(format!(
                "Advisory status is {}",
                self.advisory.status
            )));
        }

        let briefs = if self.advisory.issue_keys.is_empty() {
            Vec::new()
        } else {
            self.ctx
                .services
                .issues
                .issue_briefs(&self.advisory.issue_keys)?
        };

        if let Some(result) = self.check_ownership(&briefs)? {
            return Ok(result);
        }

        match self.advisory.status {
            AdvisoryStatus::NewFiles => self.try_to_advance(AdvisoryStatus::Qe),
            AdvisoryStatus::Qe if all_release_pending(&self.advisory.issue_keys, &briefs) => {
                self.try_to_advance(AdvisoryStatus::RelPrep)
            }
            AdvisoryStatus::Qe => Ok(WorkflowResult::remove(
                "Not all issues are Release Pending",
            )),
            status => Ok(WorkflowResult::remove(format!(
                "Advisory status is {status}"
            ))),
        }
    }

    /// Claim the advisory when every linked issue is already automation's.
    fn check_ownership(&self, briefs: &[IssueBrief]) -> Result<Option<WorkflowResult>> {
        let identity = self.ctx.settings.automation_identity.as_str();
        let foreign: Vec<&str> = self
            .advisory
            .issue_keys
            .iter()
            .filter(|key| {
                !briefs
                    .iter()
                    .any(|brief| &brief.key == *key && brief.assignee.as_deref() == Some(identity))
            })
            .map(String::as_str)
            .collect();

        if !foreign.is_empty() {
            return self
                .escalate(&format!(
                    "Advisory has mixed ownership: {} not owned by {identity}. Coordinate this \
                     release manually.",
                    foreign.join(", ")
                ))
                .map(Some);
        }

        if self.advisory.is_owned_by(identity) {
            return Ok(None);
        }

        let advisories = self.ctx.services.advisories;
        let current = advisories.get_advisory(self.advisory.id)?;
        if current.is_owned_by(identity) {
            debug!(advisory = %self.advisory.name, "ownership already claimed");
        } else {
            advisories.set_owner(self.advisory.id, identity)?;
            info!(advisory = %self.advisory.name, owner = identity, "claimed advisory ownership");
        }
        Ok(None)
    }

    fn try_to_advance(&self, target: AdvisoryStatus) -> Result<WorkflowResult> {
        let advisories = self.ctx.services.advisories;
        let rule_set = advisories.transition_rules(self.advisory.id)?;

        if rule_set.to_status != target {
            return self.escalate(&format!(
                "Next status is {} instead of {target}",
                rule_set.to_status
            ));
        }

        if rule_set.all_ok() {
            if target == AdvisoryStatus::RelPrep {
                if let Some(result) = self.check_product_listings()? {
                    return Ok(result);
                }
            }
            return self.set_status(target, &format!("Moving to {target}, since all rules are OK"));
        }

        match first_remedy(&rule_set) {
            Some(Remedy::StagePush) => self.stage_push(target),
            Some(Remedy::CatTests) => self.wait_for_cat_tests(target),
            Some(Remedy::SecurityAlert) => {
                advisories.refresh_security_alerts(self.advisory.id)?;
                Ok(self.ctx.wait(format!(
                    "Refreshing security alerts for {} before moving to {target}",
                    self.advisory.name
                )))
            }
            None => self.escalate(&format!(
                "Transition to {target} is blocked by:\n{}",
                rule_set.blocking_summary()
            )),
        }
    }

    fn stage_push(&self, target: AdvisoryStatus) -> Result<WorkflowResult> {
        let advisories = self.ctx.services.advisories;
        let name = &self.advisory.name;

        // A complete push predates a respin and has to be redone.
        match advisories
            .latest_stage_push(self.advisory.id)?
            .map(|push| push.status)
        {
            None | Some(PushStatus::Complete) => {
                advisories.push_to_stage(self.advisory.id)?;
                Ok(self.ctx.wait(format!(
                    "Stage-pushing {name} before moving to {target}"
                )))
            }
            Some(PushStatus::Failed) => self.escalate(&format!(
                "Stage push previously FAILED for {name}, needs manual intervention before \
                 moving to {target}"
            )),
            Some(status) => Ok(self.ctx.wait(format!(
                "Stage push already in progress ({status}) for {name}, waiting for completion \
                 before moving to {target}"
            ))),
        }
    }

    fn wait_for_cat_tests(&self, target: AdvisoryStatus) -> Result<WorkflowResult> {
        let push = self
            .ctx
            .services
            .advisories
            .latest_stage_push(self.advisory.id)?;

        let Some(push) = push.filter(|push| push.status == PushStatus::Complete) else {
            return Ok(self.ctx.wait(format!(
                "Waiting for the stage push of {} to complete before CAT tests can pass",
                self.advisory.name
            )));
        };

        let Some(completed_at) = push.updated_at else {
            return self.escalate(
                "Cannot determine stage push completion time (no timestamp available).",
            );
        };

        let timeout = self.ctx.settings.post_push_testing_timeout;
        if self.ctx.now - completed_at > timeout {
            self.escalate(&format!(
                "CAT tests didn't complete successfully within {} of the stage push",
                describe(timeout)
            ))
        } else {
            Ok(self.ctx.wait(format!(
                "Stage push completed for {}, waiting for CAT tests to complete before moving to \
                 {target}",
                self.advisory.name
            )))
        }
    }

    /// Compare each build's shipped files against the previous advisory.
    ///
    /// Builds already carrying a marker comment are skipped, so rescheduled
    /// runs do not repeat the comparison.
    fn check_product_listings(&self) -> Result<Option<WorkflowResult>> {
        let advisories = self.ctx.services.advisories;
        let id = self.advisory.id;
        let manifest = advisories.build_manifest(id)?;
        let comments = advisories.comments(id)?;

        let mut mismatched = Vec::new();
        for (package, build) in &manifest {
            let marker = product_listings_marker(&build.nvr);
            if comments.iter().any(|comment| comment.body.contains(&marker)) {
                debug!(nvr = %build.nvr, "product listings already checked");
                continue;
            }

            let Some(previous) = advisories.previous_advisory(id, package)? else {
                advisories.add_comment(
                    id,
                    &format!("{marker}\n\nNew package - no need to check package file list change."),
                )?;
                continue;
            };

            let previous_manifest = advisories.build_manifest(previous.id)?;
            let previous_build = previous_manifest
                .get(package)
                .with_context(|| format!("{} does not ship {package}", previous.name))?;

            let matched = build.files == previous_build.files;
            advisories.add_comment(
                id,
                &listing_comment(&marker, build, previous_build, &previous, matched)?,
            )?;
            if !matched {
                mismatched.push(package.as_str());
            }
        }

        if mismatched.is_empty() {
            return Ok(None);
        }
        self.escalate(&format!(
            "The package file lists of this build don't match their previous builds - \
             mismatched packages: {}.\nSee advisory comments for details.",
            mismatched.join(", ")
        ))
        .map(Some)
    }

    fn set_status(&self, status: AdvisoryStatus, why: &str) -> Result<WorkflowResult> {
        self.ctx
            .services
            .advisories
            .change_status(self.advisory.id, status)?;
        info!(advisory = %self.advisory.name, from = %self.advisory.status, to = %status, "changed status");

        Ok(if status.continues_processing() {
            WorkflowResult::now(why)
        } else {
            WorkflowResult::remove(why)
        })
    }

    /// File or update the tracking issue for this advisory and stop.
    fn escalate(&self, why: &str) -> Result<WorkflowResult> {
        let issues = self.ctx.services.issues;
        let settings = self.ctx.settings;
        let tag = needs_attention_tag(self.advisory.id);

        match issues.find_by_tag(&settings.attention_project, &tag, None)? {
            Some(existing) if existing.has_label(labels::NEEDS_ATTENTION) => {
                issues.add_comment(&existing.key, why)?;
            }
            Some(existing) => {
                issues.add_label(&existing.key, labels::NEEDS_ATTENTION, Some(why))?;
            }
            None => {
                let key = issues.create_issue(&NewIssue {
                    project: settings.attention_project.clone(),
                    summary: format!(
                        "{} ({}) needs attention",
                        self.advisory.name, self.advisory.synopsis
                    ),
                    description: format!("{tag}\n\nAdvisory: {}\n\n{why}", self.advisory.url),
                    labels: vec![labels::NEEDS_ATTENTION.to_string()],
                    assignee: Some(settings.automation_identity.clone()),
                })?;
                info!(advisory = %self.advisory.name, issue = %key, "opened tracking issue");
            }
        }

        warn!(advisory = %self.advisory.name, reason = why, "flagged for attention");
        Ok(WorkflowResult::remove(why))
    }
}

fn listing_comment(
    marker: &str,
    current: &PackageBuild,
    previous: &PackageBuild,
    previous_advisory: &Advisory,
    matched: bool,
) -> Result<String> {
    let mut comment = format!(
        "{marker}\n\nCompared the file lists for {} to the file lists for\n{} in {} -\n",
        current.nvr, previous.nvr, previous_advisory.url
    );
    if matched {
        comment.push_str(
            "the same subpackages are shipped to each variant. Proceeding with the advisory \
             workflow.",
        );
    } else {
        comment.push_str(&format!(
            "differences were found.\n\nOld file list:\n{}\n\nNew file list:\n{}\n\nFlagging for \
             human attention.",
            serde_json::to_string_pretty(previous).context("render previous file list")?,
            serde_json::to_string_pretty(current).context("render current file list")?
        ));
    }
    Ok(comment)
}
