//! Parser for the test service's flavour of JUnit XML.
//!
//! ```xml
//! <testsuites>
//!   <testsuite name="/plans/tier1">
//!     <testing-environment name="provisioned">
//!       <property name="arch" value="x86_64"/>
//!     </testing-environment>
//!     <testcase name="/tests/smoke">
//!       <fmf-id url="https://git.example.com/tests" ref="main"/>
//!       <logs><log name="testout.log" href="https://logs.example.com/1"/></logs>
//!       <failure/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use roxmltree::{Document, Node};

use super::{TestCase, TestResult, TestSuite};

#[derive(Debug, thiserror::Error)]
pub enum XUnitParseError {
    #[error("malformed xunit XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("test suite '{suite}' has no provisioned arch")]
    MissingArch { suite: String },
    #[error("test suite '{suite}' has a test case without a name")]
    UnnamedTestCase { suite: String },
    #[error("test case '{case}' has no fmf-id")]
    MissingFmfId { case: String },
    #[error("test case '{case}' has an incomplete fmf-id")]
    IncompleteFmfId { case: String },
}

/// Parse every top-level `<testsuite>` of a document.
///
/// # Errors
///
/// Returns an error on malformed XML or when a suite or case lacks a field the
/// comparison needs.
pub fn parse_suites(xml: &str) -> Result<Vec<TestSuite>, XUnitParseError> {
    let doc = Document::parse(xml)?;
    doc.root_element()
        .children()
        .filter(|node| node.has_tag_name("testsuite"))
        .map(parse_suite)
        .collect()
}

fn parse_suite(node: Node<'_, '_>) -> Result<TestSuite, XUnitParseError> {
    let name = node.attribute("name").unwrap_or("unknown").to_string();

    let arch = child(node, "testing-environment", Some("provisioned"))
        .and_then(|env| child(env, "property", Some("arch")))
        .and_then(|prop| prop.attribute("value"))
        .ok_or_else(|| XUnitParseError::MissingArch {
            suite: name.clone(),
        })?
        .to_string();

    let cases = node
        .children()
        .filter(|n| n.has_tag_name("testcase"))
        .map(|case| parse_case(case, &name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TestSuite { name, arch, cases })
}

fn parse_case(node: Node<'_, '_>, suite: &str) -> Result<TestCase, XUnitParseError> {
    let name = node
        .attribute("name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| XUnitParseError::UnnamedTestCase {
            suite: suite.to_string(),
        })?
        .to_string();

    let fmf_id = child(node, "fmf-id", None).ok_or_else(|| XUnitParseError::MissingFmfId {
        case: name.clone(),
    })?;
    let (Some(url), Some(reference)) = (
        fmf_id.attribute("url").filter(|v| !v.is_empty()),
        fmf_id.attribute("ref").filter(|v| !v.is_empty()),
    ) else {
        return Err(XUnitParseError::IncompleteFmfId { case: name });
    };

    let log = child(node, "logs", None)
        .and_then(|logs| child(logs, "log", Some("testout.log")))
        .and_then(|log| log.attribute("href"))
        .unwrap_or_default()
        .to_string();

    let result = if child(node, "failure", None).is_some() {
        TestResult::Fail
    } else if child(node, "error", None).is_some() {
        TestResult::Error
    } else if child(node, "skipped", None).is_some() {
        TestResult::Skipped
    } else {
        TestResult::Pass
    };

    Ok(TestCase {
        name,
        url: url.to_string(),
        reference: reference.to_string(),
        log,
        result,
    })
}

/// First child element with `tag`, optionally also matching its `name` attribute.
fn child<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    name: Option<&str>,
) -> Option<Node<'a, 'input>> {
    node.children().find(|n| {
        n.has_tag_name(tag) && name.is_none_or(|wanted| n.attribute("name") == Some(wanted))
    })
}
