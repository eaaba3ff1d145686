//! Transition rule sets and the ordered table of remedies for blocking rules.
//!
//! A rule set is fetched fresh for every evaluation and never cached: the
//! outcomes reflect live gating state on the advisory tracker.

use serde::{Deserialize, Serialize};

use crate::model::AdvisoryStatus;
use crate::model::wire_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleOutcome {
    Block,
    Ok,
    Unknown,
}

wire_enum!(RuleOutcome, "rule outcome", {
    Block => "BLOCK",
    Ok => "OK",
    Unknown => "UNKNOWN",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub name: String,
    pub outcome: RuleOutcome,
    #[serde(default)]
    pub details: String,
}

/// Gating rules for an advisory's move from one status to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRuleSet {
    pub from_status: AdvisoryStatus,
    pub to_status: AdvisoryStatus,
    #[serde(default)]
    pub rules: Vec<TransitionRule>,
}

impl TransitionRuleSet {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.rules.iter().all(|rule| rule.outcome == RuleOutcome::Ok)
    }

    /// Rules that are not `OK`, including ones whose outcome is unknown.
    pub fn not_ok(&self) -> impl Iterator<Item = &TransitionRule> {
        self.rules.iter().filter(|rule| rule.outcome != RuleOutcome::Ok)
    }

    /// `name: details` for each rule that is explicitly blocking.
    #[must_use]
    pub fn blocking_summary(&self) -> String {
        self.rules
            .iter()
            .filter(|rule| rule.outcome == RuleOutcome::Block)
            .map(|rule| format!("{}: {}", rule.name, rule.details))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the advisory handler does about a blocking rule it knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Push to staging, or wait for the push in flight.
    StagePush,
    /// Wait for post-push tests within the timeout window.
    CatTests,
    /// Ask the tracker to recompute security alerts.
    SecurityAlert,
}

/// One entry of the remedy table.
#[derive(Debug, Clone, Copy)]
pub struct BlockerRemedy {
    pub applies: fn(&TransitionRule) -> bool,
    pub remedy: Remedy,
}

/// Remedies in priority order; the first entry matching any non-OK rule wins.
pub const REMEDIES: &[BlockerRemedy] = &[
    BlockerRemedy {
        applies: |rule| rule.name == "Stagepush",
        remedy: Remedy::StagePush,
    },
    BlockerRemedy {
        applies: |rule| rule.name == "Cat",
        remedy: Remedy::CatTests,
    },
    BlockerRemedy {
        applies: |rule| rule.name == "Securityalert",
        remedy: Remedy::SecurityAlert,
    },
];

/// The remedy for the highest-priority blocking condition, or `None` when no
/// known remedy applies and a human has to look.
#[must_use]
pub fn first_remedy(rule_set: &TransitionRuleSet) -> Option<Remedy> {
    first_remedy_in(REMEDIES, rule_set)
}

#[must_use]
pub fn first_remedy_in(table: &[BlockerRemedy], rule_set: &TransitionRuleSet) -> Option<Remedy> {
    table
        .iter()
        .find(|entry| rule_set.not_ok().any(|rule| (entry.applies)(rule)))
        .map(|entry| entry.remedy)
}
