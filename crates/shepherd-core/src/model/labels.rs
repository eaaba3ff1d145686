//! Labels the supervisor reads and writes on tracked issues.

/// Halts automated processing until a human removes it.
pub const NEEDS_ATTENTION: &str = "shepherd_needs_attention";
/// A backport was prepared by automation.
pub const BACKPORTED: &str = "shepherd_backported";
/// A rebase was prepared by automation.
pub const REBASED: &str = "shepherd_rebased";
/// The automation's merge request has been merged.
pub const MERGED: &str = "shepherd_merged";
/// A baseline reproduction is in flight; its table lives in a comment.
pub const REPRODUCING_TESTS: &str = "shepherd_reproducing_tests";

/// Any of these marks an issue as the automation's responsibility.
pub const OWNERSHIP: [&str; 3] = [BACKPORTED, REBASED, MERGED];
