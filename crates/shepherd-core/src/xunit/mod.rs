//! Deterministic comparison of two xunit test reports.
//!
//! Suites are matched by `(name, arch)`. Within a matched pair every test case
//! name from either side is classified by its `(result_a, result_b)` pair.
//! Reports render to TOML with a fixed header; identical inputs always render
//! byte-identical output.

mod parse;

pub use parse::{XUnitParseError, parse_suites};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Result of one test case in one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Fail,
    Error,
    Skipped,
    /// The case does not exist in this report.
    Missing,
}

impl TestResult {
    const fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub url: String,
    pub reference: String,
    pub log: String,
    pub result: TestResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub name: String,
    pub arch: String,
    pub cases: Vec<TestCase>,
}

/// Comparison bucket for one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Passed in both reports.
    Works,
    /// Passed in A, failed or errored in B.
    Regression,
    /// Failed or errored in A, passed in B.
    Fixed,
    /// Failed or errored in both.
    Broken,
    /// Any other combination, including skipped and missing.
    Difference,
}

impl Category {
    #[must_use]
    pub const fn classify(a: TestResult, b: TestResult) -> Self {
        match (a, b) {
            (TestResult::Pass, TestResult::Pass) => Self::Works,
            (TestResult::Pass, b) if b.is_failure() => Self::Regression,
            (a, TestResult::Pass) if a.is_failure() => Self::Fixed,
            (a, b) if a.is_failure() && b.is_failure() => Self::Broken,
            _ => Self::Difference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonStatus {
    pub generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonCounts {
    pub works: u64,
    pub regression: u64,
    pub fixed: u64,
    pub broken: u64,
    pub difference: u64,
}

impl ComparisonCounts {
    fn bump(&mut self, category: Category) {
        let slot = match category {
            Category::Works => &mut self.works,
            Category::Regression => &mut self.regression,
            Category::Fixed => &mut self.fixed,
            Category::Broken => &mut self.broken,
            Category::Difference => &mut self.difference,
        };
        *slot += 1;
    }
}

/// A test case whose results differ in an interesting way between reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseComparison {
    pub name: String,
    pub arch: String,
    pub url: String,
    pub reference: String,
    pub result_a: TestResult,
    pub result_b: TestResult,
    pub log_a: String,
    pub log_b: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XUnitComparison {
    pub status: ComparisonStatus,
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "total_counts")]
    pub counts: ComparisonCounts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regression: Vec<CaseComparison>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fixed: Vec<CaseComparison>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub broken: Vec<CaseComparison>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub difference: Vec<CaseComparison>,
}

const TOML_HEADER: &str = "\
# XUnit Comparison Report
# Results of comparing two xunit test reports, A and B.
# Each section lists the test cases that differ between the two reports.
# The 'total_counts' section gives the number of test cases in each category.
#
# Categories:
# - regression: passed in A, failed in B.
# - fixed: failed in A, passed in B.
# - broken: failed in both reports.
# - works: passed in both reports (counted, not listed).
# - difference: any other combination, such as skipped or missing.
";

impl XUnitComparison {
    fn empty(metadata: BTreeMap<String, String>, status: ComparisonStatus) -> Self {
        Self {
            status,
            metadata,
            counts: ComparisonCounts::default(),
            regression: Vec::new(),
            fixed: Vec::new(),
            broken: Vec::new(),
            difference: Vec::new(),
        }
    }

    fn record(&mut self, category: Category, entry: CaseComparison) {
        self.counts.bump(category);
        match category {
            Category::Works => {}
            Category::Regression => self.regression.push(entry),
            Category::Fixed => self.fixed.push(entry),
            Category::Broken => self.broken.push(entry),
            Category::Difference => self.difference.push(entry),
        }
    }

    /// Render the report as commented TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if TOML serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        Ok(format!("{TOML_HEADER}{}", toml::to_string(self)?))
    }
}

/// Compare report A against report B.
///
/// The first suite wins when a report repeats a `(name, arch)` key.
#[must_use]
pub fn compare(
    suites_a: &[TestSuite],
    suites_b: &[TestSuite],
    metadata: BTreeMap<String, String>,
) -> XUnitComparison {
    let index_a = index_suites(suites_a);
    let index_b = index_suites(suites_b);

    let keys_a: BTreeSet<_> = index_a.keys().collect();
    let keys_b: BTreeSet<_> = index_b.keys().collect();
    if keys_a != keys_b {
        let reason = format!(
            "reports contain different test suites and cannot be compared: A has {}, B has {}",
            describe_keys(&keys_a),
            describe_keys(&keys_b)
        );
        return XUnitComparison::empty(
            metadata,
            ComparisonStatus {
                generated: false,
                reason: Some(reason),
            },
        );
    }

    let mut report = XUnitComparison::empty(
        metadata,
        ComparisonStatus {
            generated: true,
            reason: None,
        },
    );

    for (key, suite_a) in &index_a {
        let Some(suite_b) = index_b.get(key) else {
            continue;
        };
        compare_suites(suite_a, suite_b, &mut report);
    }

    for list in [
        &mut report.regression,
        &mut report.fixed,
        &mut report.broken,
        &mut report.difference,
    ] {
        list.sort_by(|x, y| (&x.name, &x.arch).cmp(&(&y.name, &y.arch)));
    }

    report
}

fn index_suites(suites: &[TestSuite]) -> BTreeMap<(&str, &str), &TestSuite> {
    let mut index = BTreeMap::new();
    for suite in suites {
        index
            .entry((suite.name.as_str(), suite.arch.as_str()))
            .or_insert(suite);
    }
    index
}

fn describe_keys(keys: &BTreeSet<&(&str, &str)>) -> String {
    let items: Vec<String> = keys
        .iter()
        .map(|(name, arch)| format!("{name} ({arch})"))
        .collect();
    format!("[{}]", items.join(", "))
}

fn compare_suites(suite_a: &TestSuite, suite_b: &TestSuite, report: &mut XUnitComparison) {
    let cases_a = index_cases(suite_a);
    let cases_b = index_cases(suite_b);
    let names: BTreeSet<&str> = cases_a.keys().chain(cases_b.keys()).copied().collect();

    for name in names {
        let case_a = cases_a.get(name).copied();
        let case_b = cases_b.get(name).copied();
        let Some(either) = case_a.or(case_b) else {
            continue;
        };

        let result_a = case_a.map_or(TestResult::Missing, |c| c.result);
        let result_b = case_b.map_or(TestResult::Missing, |c| c.result);
        let category = Category::classify(result_a, result_b);

        report.record(
            category,
            CaseComparison {
                name: either.name.clone(),
                arch: suite_a.arch.clone(),
                url: either.url.clone(),
                reference: either.reference.clone(),
                result_a,
                result_b,
                log_a: case_a.map(|c| c.log.clone()).unwrap_or_default(),
                log_b: case_b.map(|c| c.log.clone()).unwrap_or_default(),
            },
        );
    }
}

fn index_cases(suite: &TestSuite) -> BTreeMap<&str, &TestCase> {
    let mut index = BTreeMap::new();
    for case in &suite.cases {
        index.entry(case.name.as_str()).or_insert(case);
    }
    index
}
