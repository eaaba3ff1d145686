//! Reproduce failed test runs against the previous build.
//!
//! Each failed run is cloned with the previous build substituted and the two
//! runs are paired. The pairing is recorded as a [`PairingTable`] comment on
//! the issue, which is re-read on every dispatch until every reproduction has
//! settled; then both runs' xunit reports are compared and attached.

pub mod table;

pub use table::{Headline, PairingRow, PairingTable, PairingTableError, RunLink};

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::model::test_run::BUILDS_VARIABLE;
use crate::model::{Issue, TestRun, TestRunState};
use crate::services::{Attachment, TestService};
use crate::xunit;

/// A failed run and its reproduction with the previous build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub original: TestRun,
    pub reproduction: TestRun,
}

impl Pairing {
    /// File name of the comparison report attached for this pair.
    #[must_use]
    pub fn attachment_name(&self) -> String {
        format!(
            "comparison-{}--{}.toml",
            self.reproduction.id, self.original.id
        )
    }

    fn attachment_link(&self) -> String {
        format!("[compare|^{}]", self.attachment_name())
    }

    /// Row for this pair. A `Reproducing` table only carries live states, so a
    /// reproduction that already completed is shown as `complete` there.
    fn row(&self, headline: Headline, comparison: Option<String>) -> PairingRow {
        let status = match headline {
            Headline::Reproducing => self.reproduction.state.as_str(),
            Headline::Reproduced | Headline::FailedToReproduce => {
                self.reproduction.outcome_label()
            }
        };
        PairingRow {
            arches: self.original.arches(),
            original: RunLink {
                id: self.original.id.clone(),
                url: self.original.url.clone(),
            },
            reproduction: RunLink {
                id: self.reproduction.id.clone(),
                url: self.reproduction.url.clone(),
            },
            status: status.to_string(),
            comparison,
        }
    }

    /// Compare the reproduction (A) against the original (B).
    ///
    /// `Ok(Err(reason))` means the pair could not be compared.
    fn compare(&self, tests: &dyn TestService) -> Result<Result<Attachment, String>> {
        let (Some(url_a), Some(url_b)) = (
            self.reproduction.result_artifact_url.as_deref(),
            self.original.result_artifact_url.as_deref(),
        ) else {
            return Ok(Err("no result artifact to compare".to_string()));
        };

        let xml_a = tests
            .fetch_artifact(url_a)
            .with_context(|| format!("fetch results of {}", self.reproduction.id))?;
        let xml_b = tests
            .fetch_artifact(url_b)
            .with_context(|| format!("fetch results of {}", self.original.id))?;

        let parsed =
            xunit::parse_suites(&xml_a).and_then(|a| xunit::parse_suites(&xml_b).map(|b| (a, b)));
        let (suites_a, suites_b) = match parsed {
            Ok(suites) => suites,
            Err(err) => return Ok(Err(format!("unreadable result artifact: {err}"))),
        };

        let metadata = BTreeMap::from([
            ("build_1".to_string(), build_label(&self.reproduction)),
            ("test_run_id_1".to_string(), self.reproduction.id.clone()),
            ("build_2".to_string(), build_label(&self.original)),
            ("test_run_id_2".to_string(), self.original.id.clone()),
        ]);
        let report = xunit::compare(&suites_a, &suites_b, metadata)
            .to_toml()
            .context("render comparison report")?;

        Ok(Ok(Attachment {
            name: self.attachment_name(),
            content: report,
        }))
    }
}

fn build_label(run: &TestRun) -> String {
    run.build_under_test().unwrap_or("unknown").to_string()
}

/// Output of a settled reproduction: reports to attach and the final table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedReproduction {
    pub attachments: Vec<Attachment>,
    pub table: PairingTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineReproduction {
    pub failure_summary: String,
    pub previous_build: String,
    pub pairings: Vec<Pairing>,
    /// Comment holding the table, once it has been posted.
    pub comment_id: Option<String>,
}

impl BaselineReproduction {
    /// Start a reproduction of every failed run with `previous_build`.
    ///
    /// # Errors
    ///
    /// Returns an error if a failed run cannot be fetched, has no environment
    /// carrying the build under test, or its reproduction cannot be submitted;
    /// nothing is recorded in that case.
    pub fn create(
        tests: &dyn TestService,
        failure_summary: &str,
        failed_run_ids: &[String],
        previous_build: &str,
    ) -> Result<Self> {
        let mut pairings = Vec::with_capacity(failed_run_ids.len());
        for id in failed_run_ids {
            let original = tests
                .get_run(id)
                .with_context(|| format!("fetch failed test run {id}"))?;
            if !original
                .environments
                .iter()
                .any(|env| env.variables.contains_key(BUILDS_VARIABLE))
            {
                bail!(
                    "test run {id} has no environment carrying {BUILDS_VARIABLE}, \
                     cannot reproduce it with {previous_build}"
                );
            }
            info!(run = %original.id, build = previous_build, "reproducing failed test run");
            let reproduction = tests
                .reproduce_with_build(&original, previous_build)
                .with_context(|| {
                    format!(
                        "start reproduction of test run {id} with previous build {previous_build}"
                    )
                })?;
            pairings.push(Pairing {
                original,
                reproduction,
            });
        }

        Ok(Self {
            failure_summary: failure_summary.to_string(),
            previous_build: previous_build.to_string(),
            pairings,
            comment_id: None,
        })
    }

    /// The newest pairing table in the issue's comments with its comment id.
    ///
    /// # Errors
    ///
    /// Returns an error if the newest comment carrying a headline is malformed.
    pub fn find_table(issue: &Issue) -> Result<Option<(PairingTable, String)>, PairingTableError> {
        for comment in issue.comments.iter().rev() {
            if let Some(table) = PairingTable::parse(&comment.body)? {
                return Ok(Some((table, comment.id.clone())));
            }
        }
        Ok(None)
    }

    /// Rebuild the reproduction from the issue's table, refreshing every run.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is malformed or a run cannot be fetched.
    pub fn load(tests: &dyn TestService, issue: &Issue) -> Result<Option<Self>> {
        let Some((table, comment_id)) = Self::find_table(issue)? else {
            return Ok(None);
        };

        let mut pairings = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let original = tests
                .get_run(&row.original.id)
                .with_context(|| format!("fetch test run {}", row.original.id))?;
            let reproduction = tests
                .get_run(&row.reproduction.id)
                .with_context(|| format!("fetch test run {}", row.reproduction.id))?;
            pairings.push(Pairing {
                original,
                reproduction,
            });
        }

        Ok(Some(Self {
            failure_summary: table.failure_summary,
            previous_build: table.previous_build,
            pairings,
            comment_id: Some(comment_id),
        }))
    }

    /// Every reproduction has stopped changing.
    #[must_use]
    pub fn settled(&self) -> bool {
        self.pairings
            .iter()
            .all(|pair| pair.reproduction.state.is_terminal())
    }

    /// Every reproduction ran to completion.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.pairings
            .iter()
            .all(|pair| pair.reproduction.state == TestRunState::Complete)
    }

    #[must_use]
    pub fn headline(&self) -> Headline {
        if self.complete() {
            Headline::Reproduced
        } else if self.settled() {
            Headline::FailedToReproduce
        } else {
            Headline::Reproducing
        }
    }

    /// The table as it stands, without a comparison column.
    #[must_use]
    pub fn table(&self) -> PairingTable {
        let headline = self.headline();
        self.table_with(
            self.pairings
                .iter()
                .map(|pair| pair.row(headline, None))
                .collect(),
        )
    }

    fn table_with(&self, rows: Vec<PairingRow>) -> PairingTable {
        PairingTable {
            failure_summary: self.failure_summary.clone(),
            headline: self.headline(),
            previous_build: self.previous_build.clone(),
            rows,
        }
    }

    /// Compare every pair and build the final table with a comparison column.
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact cannot be downloaded.
    pub fn finish(&self, tests: &dyn TestService) -> Result<FinishedReproduction> {
        let mut attachments = Vec::new();
        let mut rows = Vec::with_capacity(self.pairings.len());
        let headline = self.headline();

        for pair in &self.pairings {
            let cell = match pair.compare(tests)? {
                Ok(attachment) => {
                    attachments.push(attachment);
                    pair.attachment_link()
                }
                Err(reason) => {
                    warn!(
                        original = %pair.original.id,
                        reproduction = %pair.reproduction.id,
                        %reason,
                        "skipping comparison"
                    );
                    reason
                }
            };
            rows.push(pair.row(headline, Some(cell)));
        }

        Ok(FinishedReproduction {
            attachments,
            table: self.table_with(rows),
        })
    }
}
