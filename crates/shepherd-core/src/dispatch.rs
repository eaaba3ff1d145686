//! Pop work items, run their handler, and record the outcome in the queue.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::ErrorCode;
use crate::handler::{
    ErratumHandler, HandlerContext, HandlerSettings, IssueHandler, WorkflowResult,
};
use crate::model::{WorkItem, WorkItemKind};
use crate::queue::WorkQueue;
use crate::services::Services;

/// Pause after a failed dispatch before polling again.
pub const ERROR_PAUSE: Duration = Duration::from_secs(60);

/// Fetch the item's entity and run one handler step, outside of any queue.
///
/// # Errors
///
/// Returns an error if the entity cannot be fetched or the handler fails.
pub fn process_item(
    services: Services<'_>,
    settings: &HandlerSettings,
    item: &WorkItem,
) -> Result<WorkflowResult> {
    let ctx = HandlerContext {
        services,
        settings,
        now: Utc::now(),
    };

    match item.kind {
        WorkItemKind::ProcessIssue => {
            let issue = services
                .issues
                .get_issue(&item.key)
                .with_context(|| format!("fetch issue {}", item.key))?;
            IssueHandler::new(ctx, issue).run()
        }
        WorkItemKind::ProcessErratum => {
            let id: u64 = item
                .key
                .parse()
                .with_context(|| format!("advisory id '{}' is not a number", item.key))?;
            let advisory = services
                .advisories
                .get_advisory(id)
                .with_context(|| format!("fetch advisory {id}"))?;
            ErratumHandler::new(ctx, advisory).run()
        }
    }
}

/// Reschedule or drop `item` according to `result`.
///
/// # Errors
///
/// Returns an error if the queue update fails.
pub fn apply_result(queue: &WorkQueue, item: &WorkItem, result: &WorkflowResult) -> Result<()> {
    if result.is_removal() {
        queue.remove_work_items([item])?;
    } else {
        let delay = Duration::from_secs(u64::try_from(result.reschedule_in).unwrap_or_default());
        queue.schedule_work_items([item], delay)?;
    }
    Ok(())
}

pub struct Dispatcher<'a> {
    queue: &'a WorkQueue,
    services: Services<'a>,
    settings: &'a HandlerSettings,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub const fn new(
        queue: &'a WorkQueue,
        services: Services<'a>,
        settings: &'a HandlerSettings,
    ) -> Self {
        Self {
            queue,
            services,
            settings,
        }
    }

    /// Run `item` and record its outcome.
    ///
    /// On error the queue is left alone, so the item reappears once its
    /// pop-time hiding expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler or the queue update fails.
    pub fn dispatch(&self, item: &WorkItem) -> Result<WorkflowResult> {
        let result = process_item(self.services, self.settings, item)?;
        apply_result(self.queue, item, &result)?;
        if result.is_removal() {
            info!(%item, status = %result.status, reschedule_in = "never", "processed");
        } else {
            info!(%item, status = %result.status, reschedule_in = result.reschedule_in, "processed");
        }
        Ok(result)
    }

    /// Dispatch the earliest ready item, if any is ready now.
    ///
    /// # Errors
    ///
    /// Returns an error if popping or dispatching fails.
    pub fn process_ready(&self) -> Result<Option<(WorkItem, WorkflowResult)>> {
        let Some(item) = self.queue.pop_first_ready_work_item()? else {
            return Ok(None);
        };
        let result = self.dispatch(&item)?;
        Ok(Some((item, result)))
    }

    /// Wait for the next ready item and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns an error if polling or dispatching fails.
    pub fn process_next(&self) -> Result<(WorkItem, WorkflowResult)> {
        let item = self.queue.wait_first_ready_work_item()?;
        let result = self.dispatch(&item)?;
        Ok((item, result))
    }

    /// Dispatch forever. Failures are logged and followed by `pause`.
    pub fn run_forever(&self, pause: Duration) -> ! {
        loop {
            if let Err(err) = self.process_next() {
                let code = ErrorCode::classify(&err);
                let detail = format!("{err:#}");
                error!(code = code.code(), error = %detail, "error while processing work item");
                std::thread::sleep(pause);
            }
        }
    }
}
