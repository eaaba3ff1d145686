use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{HandlerContext, WorkflowResult, describe};
use crate::baseline::{BaselineReproduction, PairingTableError};
use crate::model::advisory::advisory_id_from_arg;
use crate::model::{
    Advisory, Issue, IssueStatus, MergeRequestState, PreliminaryTesting, TestingState, labels,
};

/// Comment body announcing that an issue needs a human.
#[must_use]
pub fn attention_panel(why: &str) -> String {
    format!(
        "{{panel:title=Shepherd needs attention|borderStyle=solid|borderColor=#ffab00|bgColor=#fffae6}}\n\
         {why}\n\
         {{panel}}"
    )
}

/// Moves one issue a single step through its lifecycle.
pub struct IssueHandler<'a> {
    ctx: HandlerContext<'a>,
    issue: Issue,
}

impl<'a> IssueHandler<'a> {
    #[must_use]
    pub const fn new(ctx: HandlerContext<'a>, issue: Issue) -> Self {
        Self { ctx, issue }
    }

    /// Run one step.
    ///
    /// # Errors
    ///
    /// Returns an error when a collaborator call fails. Policy problems are
    /// escalated on the issue instead.
    pub fn run(mut self) -> Result<WorkflowResult> {
        info!(issue = %self.issue.key, url = %self.issue.url, "running issue workflow");

        if self.issue.has_label(labels::NEEDS_ATTENTION) && !self.ctx.settings.ignore_needs_attention
        {
            return Ok(WorkflowResult::remove(
                "Issue has the needs-attention label",
            ));
        }

        let Some(component) = self.issue.single_component().map(str::to_string) else {
            return self.escalate(&format!(
                "This issue has {} components. Only issues with a single component are handled \
                 automatically.",
                self.issue.components.len()
            ));
        };

        match self.issue.advisory_link.clone() {
            None => self.before_advisory(&component),
            Some(link) => self.after_advisory(&component, &link),
        }
    }

    fn before_advisory(&mut self, component: &str) -> Result<WorkflowResult> {
        if !labels::OWNERSHIP
            .iter()
            .any(|label| self.issue.has_label(label))
        {
            return Ok(WorkflowResult::remove(format!(
                "Issue without automation labels: {:?}",
                self.issue.labels
            )));
        }

        self.label_merge_if_needed(component)?;
        let settings = self.ctx.settings;

        if !self.issue.has_label(labels::MERGED) {
            return Ok(WorkflowResult::wait_for(
                format!(
                    "No merged merge request found, checking again in {}",
                    describe(settings.unmerged_delay)
                ),
                settings.unmerged_delay,
            ));
        }

        match self.latest_merged_at(component)? {
            Some(merged_at) if (self.ctx.now - merged_at).abs() < settings.merge_grace => {
                Ok(WorkflowResult::wait_for(
                    "Waiting for the advisory to be created",
                    settings.merged_wait,
                ))
            }
            _ => self.escalate(&format!(
                "A merge request was merged for this issue more than {} ago but no advisory was \
                 created. Please look for gating failures or other reasons that might have \
                 blocked advisory creation.",
                describe(settings.merge_grace)
            )),
        }
    }

    fn after_advisory(&mut self, component: &str, link: &str) -> Result<WorkflowResult> {
        if self.issue.fixed_in_build.is_none() {
            return self.escalate("Issue has an advisory link but no fixed-in build");
        }
        if self.issue.preliminary_testing != Some(PreliminaryTesting::Pass) {
            return self.escalate(
                "Issue does not have Preliminary Testing set to Pass. This should have happened \
                 before the merge request was merged.",
            );
        }
        if !self.issue.has_test_coverage() {
            return self.escalate(
                "Issue does not have Test Coverage set. This should have happened before the \
                 merge request was merged.",
            );
        }

        // Dashboards key off the merged label even when the merge was never
        // observed before the advisory appeared.
        self.label_merge_if_needed(component)?;

        match self.issue.status {
            IssueStatus::New | IssueStatus::Planning | IssueStatus::InProgress => self.set_status(
                IssueStatus::Integration,
                "Preliminary testing has passed, moving to Integration",
            ),
            IssueStatus::Integration => self.integration(component, link),
            status @ (IssueStatus::ReleasePending | IssueStatus::Closed) => Ok(
                WorkflowResult::remove(format!("Issue status is {status}")),
            ),
        }
    }

    fn integration(&mut self, component: &str, link: &str) -> Result<WorkflowResult> {
        if self.issue.has_label(labels::REPRODUCING_TESTS) {
            return self.check_reproduction();
        }

        let Some(advisory_id) = advisory_id_from_arg(link) else {
            return self.escalate(&format!("Advisory link '{link}' does not name an advisory"));
        };
        let advisory = self.ctx.services.advisories.get_advisory(advisory_id)?;

        let after_baseline = match BaselineReproduction::find_table(&self.issue) {
            Ok(table) => table.is_some(),
            Err(err) => {
                return self.escalate(&format!(
                    "Cannot parse the reproduction table in the issue comments: {err}"
                ));
            }
        };

        let analysis =
            self.ctx
                .services
                .analyst
                .analyze(&self.issue, &advisory, after_baseline)?;
        debug!(issue = %self.issue.key, state = %analysis.state, "testing analysis");
        let comment = analysis.comment.as_deref();

        match analysis.state {
            TestingState::NotRunning => {
                self.escalate_with("Tests aren't running - see details below", comment)
            }
            TestingState::Pending => Ok(self.ctx.wait("Tests are pending")),
            TestingState::Running => Ok(self.ctx.wait("Tests are running")),
            TestingState::Failed if !analysis.failed_test_ids.is_empty() && !after_baseline => self
                .start_reproduction(
                    &advisory,
                    component,
                    comment.unwrap_or_default(),
                    &analysis.failed_test_ids,
                ),
            TestingState::Failed => {
                self.escalate_with("Tests failed - see details below", comment)
            }
            TestingState::Passed => self.set_status(
                IssueStatus::ReleasePending,
                comment.unwrap_or("Final testing has passed."),
            ),
            TestingState::Waived => self.set_status(
                IssueStatus::ReleasePending,
                comment.unwrap_or("Final testing has been waived, moving to Release Pending."),
            ),
        }
    }

    fn start_reproduction(
        &mut self,
        advisory: &Advisory,
        component: &str,
        failure_summary: &str,
        failed_run_ids: &[String],
    ) -> Result<WorkflowResult> {
        let advisories = self.ctx.services.advisories;

        let Some(previous) = advisories.previous_advisory(advisory.id, component)? else {
            return self.escalate_with(
                "Tests failed - see details below. Cannot start reproduction with the previous \
                 build: no previous advisory found to get the build from.",
                Some(failure_summary),
            );
        };
        let Some(previous_build) = advisories.build_nvr(previous.id, component)? else {
            return self.escalate_with(
                &format!(
                    "Tests failed - see details below. Cannot start reproduction with the \
                     previous build: {component} not found in {}.",
                    previous.name
                ),
                Some(failure_summary),
            );
        };

        let reproduction = match BaselineReproduction::create(
            self.ctx.services.tests,
            failure_summary,
            failed_run_ids,
            &previous_build,
        ) {
            Ok(reproduction) => reproduction,
            Err(err) => {
                let detail = format!("{err:#}");
                error!(issue = %self.issue.key, error = %detail, "reproduction failed to start");
                return self.escalate_with(
                    &format!("Tests failed - see details below. {detail}"),
                    Some(failure_summary),
                );
            }
        };

        self.ctx.services.issues.add_label(
            &self.issue.key,
            labels::REPRODUCING_TESTS,
            Some(&reproduction.table().render()),
        )?;

        Ok(self
            .ctx
            .wait("Waiting to reproduce tests with the previous build"))
    }

    fn check_reproduction(&mut self) -> Result<WorkflowResult> {
        let reproduction = match BaselineReproduction::load(self.ctx.services.tests, &self.issue) {
            Ok(Some(reproduction)) => reproduction,
            Ok(None) => {
                return self.escalate(
                    "Issue has the reproducing-tests label but no reproduction table in its \
                     comments",
                );
            }
            Err(err) if err.downcast_ref::<PairingTableError>().is_some() => {
                return self.escalate(&format!(
                    "Issue has the reproducing-tests label but its reproduction table cannot be \
                     parsed: {err}"
                ));
            }
            Err(err) => return Err(err),
        };

        if !reproduction.settled() {
            return Ok(self.ctx.wait("Waiting for baseline tests to complete"));
        }

        let issues = self.ctx.services.issues;
        let finished = reproduction.finish(self.ctx.services.tests)?;
        if !finished.attachments.is_empty() {
            issues.add_attachments(&self.issue.key, &finished.attachments)?;
        }
        if let Some(comment_id) = &reproduction.comment_id {
            issues.update_comment(&self.issue.key, comment_id, &finished.table.render())?;
        }
        issues.remove_label(&self.issue.key, labels::REPRODUCING_TESTS)?;

        Ok(WorkflowResult::now(
            "Baseline tests are complete, will analyze results",
        ))
    }

    /// Add the merged label when automation prepared the change and a merged
    /// merge request exists. Returns whether the label was added.
    fn label_merge_if_needed(&mut self, component: &str) -> Result<bool> {
        let prepared =
            self.issue.has_label(labels::BACKPORTED) || self.issue.has_label(labels::REBASED);
        if !prepared || self.issue.has_label(labels::MERGED) {
            return Ok(false);
        }

        for group in &self.ctx.settings.source_groups {
            let project = format!("{group}/{component}");
            let merged = self.ctx.services.source.search_merge_requests(
                &project,
                &self.issue.key,
                MergeRequestState::Merged,
            )?;
            if let Some(mr) = merged.first() {
                self.ctx.services.issues.add_label(
                    &self.issue.key,
                    labels::MERGED,
                    Some(&format!(
                        "A [merge request|{}] resolving this issue has been merged; waiting for \
                         advisory creation and final testing.",
                        mr.url
                    )),
                )?;
                self.issue.labels.insert(labels::MERGED.to_string());
                info!(issue = %self.issue.key, mr = %mr.url, "merge request merged");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn latest_merged_at(&self, component: &str) -> Result<Option<DateTime<Utc>>> {
        let mut latest = None;
        for group in &self.ctx.settings.source_groups {
            let project = format!("{group}/{component}");
            let merged = self.ctx.services.source.search_merge_requests(
                &project,
                &self.issue.key,
                MergeRequestState::Merged,
            )?;
            latest = merged
                .iter()
                .filter_map(|mr| mr.merged_at)
                .chain(latest)
                .max();
        }
        Ok(latest)
    }

    fn set_status(&self, status: IssueStatus, why: &str) -> Result<WorkflowResult> {
        let comment = format!(
            "*Changing status from {} => {status}*\n\n{why}",
            self.issue.status
        );
        self.ctx
            .services
            .issues
            .change_status(&self.issue.key, status, &comment)?;
        info!(issue = %self.issue.key, from = %self.issue.status, to = %status, "changed status");

        Ok(if status.is_final() {
            WorkflowResult::remove(why)
        } else {
            WorkflowResult::now(why)
        })
    }

    fn escalate(&self, why: &str) -> Result<WorkflowResult> {
        self.escalate_with(why, None)
    }

    fn escalate_with(&self, why: &str, details: Option<&str>) -> Result<WorkflowResult> {
        let panel = attention_panel(why);
        let comment = match details.map(str::trim) {
            Some(details) if !details.is_empty() => format!("{panel}\n\n{details}"),
            _ => panel,
        };
        self.ctx
            .services
            .issues
            .add_label(&self.issue.key, labels::NEEDS_ATTENTION, Some(&comment))?;
        warn!(issue = %self.issue.key, reason = why, "flagged for attention");
        Ok(WorkflowResult::remove(why))
    }
}
