//! Snapshots of the external entities the supervisor reasons about.
//!
//! Every status enum here is closed. Parsing an unrecognized tracker value is
//! a hard [`ParseEnumError`] so a workflow change upstream stops processing
//! instead of being guessed at.

/// Implements `as_str`, `Display`, `FromStr`, and string-based serde for a
/// closed enum whose wire spelling is fixed.
macro_rules! wire_enum {
    ($name:ident, $expected:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err($crate::model::ParseEnumError {
                        expected: $expected,
                        got: s.to_string(),
                    }),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use wire_enum;

pub mod advisory;
pub mod analysis;
pub mod issue;
pub mod labels;
pub mod merge_request;
pub mod test_run;
pub mod work_item;

pub use advisory::{Advisory, AdvisoryStatus, BuildManifest, PackageBuild, PushStatus, StagePush};
pub use analysis::{TestingAnalysis, TestingState};
pub use issue::{Comment, Issue, IssueBrief, IssueStatus, PreliminaryTesting, TestCoverage};
pub use merge_request::{MergeRequest, MergeRequestState};
pub use test_run::{ReproductionRequest, TestEnvironment, TestRun, TestRunResult, TestRunState};
pub use work_item::{WorkItem, WorkItemKind};

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}
