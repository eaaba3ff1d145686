//! HTTP implementations of the collaborator traits.

pub mod advisory_tracker;
pub mod analyst;
pub mod issue_tracker;
pub mod source_host;
pub mod test_service;

use anyhow::Result;

use shepherd_core::config::{Credentials, SupervisorConfig, Token};
use shepherd_core::services::Services;

use advisory_tracker::AdvisoryTrackerClient;
use analyst::AnalystClient;
use issue_tracker::IssueTrackerClient;
use source_host::SourceHostClient;
use test_service::TestServiceClient;

/// One client per collaborator, sharing the process lifetime.
pub struct Clients {
    issues: IssueTrackerClient,
    advisories: AdvisoryTrackerClient,
    source: SourceHostClient,
    tests: TestServiceClient,
    analyst: AnalystClient,
}

impl Clients {
    /// Build every client after checking that the `needed` tokens are set.
    ///
    /// Clients whose token is not needed still get built, without auth.
    ///
    /// # Errors
    ///
    /// Returns a missing-credentials error naming each absent token.
    pub fn connect(
        config: &SupervisorConfig,
        credentials: &Credentials,
        needed: &[Token],
        dry_run: bool,
    ) -> Result<Self> {
        credentials.require(needed)?;
        Ok(Self {
            issues: IssueTrackerClient::new(
                &config.issues.base_url,
                credentials.get(Token::IssueTracker),
                dry_run,
            ),
            advisories: AdvisoryTrackerClient::new(
                &config.advisories.base_url,
                credentials.get(Token::AdvisoryTracker),
                dry_run,
            ),
            source: SourceHostClient::new(
                &config.source.base_url,
                credentials.get(Token::SourceHost),
            ),
            tests: TestServiceClient::new(
                &config.tests.base_url,
                credentials.get(Token::TestService),
                dry_run,
            ),
            analyst: AnalystClient::new(&config.analyst.url),
        })
    }

    #[must_use]
    pub fn services(&self) -> Services<'_> {
        Services {
            issues: &self.issues,
            advisories: &self.advisories,
            source: &self.source,
            tests: &self.tests,
            analyst: &self.analyst,
        }
    }
}
