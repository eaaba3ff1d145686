//! The pairing table posted on an issue while failed runs are reproduced
//! against the previous build.
//!
//! The comment is the workflow's only checkpoint, so it is parsed strictly:
//!
//! ```text
//! <failure summary, may be empty>
//!
//! <Reproducing|Reproduced|Failed to reproduce> failed tests with previous build <NVR>:
//! ||Architecture||Original Request||Request With Old Build||<State|Result>[||Comparison]||
//! |<arch>[, <arch>...]|[<id>|<url>]|[<id>|<url>]|<state or result>[|<comparison>]|
//! ```

use std::fmt::Write as _;

use crate::model::{TestRunResult, TestRunState};

const HEADLINE_SUFFIX: &str = " failed tests with previous build ";
const BASE_HEADER: &str = "||Architecture||Original Request||Request With Old Build||";
const COMPARISON_HEADER: &str = "||Comparison";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingTableError {
    #[error("unknown reproduction headline '{0}'")]
    UnknownHeadline(String),
    #[error("reproduction headline has no build")]
    MissingBuild,
    #[error("expected pairing table header, found '{0}'")]
    BadHeader(String),
    #[error("pairing table has no rows")]
    NoRows,
    #[error("row {row}: expected {expected} cells, found {found}")]
    CellCount {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}: malformed run link '{cell}'")]
    BadLink { row: usize, cell: String },
    #[error("row {row}: no architectures")]
    NoArches { row: usize },
    #[error("row {row}: unknown run status '{word}'")]
    UnknownStatus { row: usize, word: String },
}

/// Where the reproduction stands, as announced by the table's headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Headline {
    Reproducing,
    Reproduced,
    FailedToReproduce,
}

impl Headline {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reproducing => "Reproducing",
            Self::Reproduced => "Reproduced",
            Self::FailedToReproduce => "Failed to reproduce",
        }
    }

    /// Title of the status column: live state while running, result after.
    #[must_use]
    pub const fn status_header(self) -> &'static str {
        match self {
            Self::Reproducing => "State",
            Self::Reproduced | Self::FailedToReproduce => "Result",
        }
    }

    fn parse(text: &str) -> Result<Self, PairingTableError> {
        [Self::Reproducing, Self::Reproduced, Self::FailedToReproduce]
            .into_iter()
            .find(|headline| headline.as_str() == text)
            .ok_or_else(|| PairingTableError::UnknownHeadline(text.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLink {
    pub id: String,
    pub url: String,
}

impl RunLink {
    fn render(&self) -> String {
        format!("[{}|{}]", self.id, self.url)
    }

    fn parse(cell: &str) -> Option<Self> {
        let inner = cell.strip_prefix('[')?.strip_suffix(']')?;
        let (id, url) = inner.split_once('|')?;
        let (id, url) = (id.trim(), url.trim());
        (!id.is_empty() && !url.is_empty() && !url.contains('|')).then(|| Self {
            id: id.to_string(),
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRow {
    pub arches: Vec<String>,
    pub original: RunLink,
    pub reproduction: RunLink,
    /// State or result word of the reproduction run.
    pub status: String,
    pub comparison: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTable {
    pub failure_summary: String,
    pub headline: Headline,
    pub previous_build: String,
    pub rows: Vec<PairingRow>,
}

impl PairingTable {
    fn has_comparison(&self) -> bool {
        self.rows.iter().any(|row| row.comparison.is_some())
    }

    fn header(&self) -> String {
        format!(
            "{BASE_HEADER}{}{}||",
            self.headline.status_header(),
            if self.has_comparison() {
                COMPARISON_HEADER
            } else {
                ""
            }
        )
    }

    /// Comment body for this table.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let summary = self.failure_summary.trim();
        if !summary.is_empty() {
            out.push_str(summary);
            out.push_str("\n\n");
        }
        let _ = writeln!(
            out,
            "{}{HEADLINE_SUFFIX}{}:",
            self.headline.as_str(),
            self.previous_build
        );
        out.push_str(&self.header());

        let with_comparison = self.has_comparison();
        for row in &self.rows {
            let _ = write!(
                out,
                "\n|{}|{}|{}|{}",
                row.arches.join(", "),
                row.original.render(),
                row.reproduction.render(),
                row.status
            );
            if with_comparison {
                out.push('|');
                out.push_str(&sanitize_cell(row.comparison.as_deref().unwrap_or("-")));
            }
            out.push('|');
        }
        out
    }

    /// Parse the table from a comment body.
    ///
    /// Returns `Ok(None)` when the body carries no reproduction headline.
    ///
    /// # Errors
    ///
    /// Returns an error when a headline is present but anything after it
    /// deviates from the grammar.
    pub fn parse(body: &str) -> Result<Option<Self>, PairingTableError> {
        let lines: Vec<&str> = body.lines().collect();
        let Some(headline_at) = lines.iter().position(|line| is_headline(line)) else {
            return Ok(None);
        };

        let (headline, previous_build) = parse_headline(lines[headline_at])?;
        let failure_summary = lines[..headline_at].join("\n").trim().to_string();

        let header = lines
            .get(headline_at + 1)
            .map(|line| line.trim_end())
            .unwrap_or_default();
        let expected = format!("{BASE_HEADER}{}", headline.status_header());
        let with_comparison = if header == format!("{expected}||") {
            false
        } else if header == format!("{expected}{COMPARISON_HEADER}||") {
            true
        } else {
            return Err(PairingTableError::BadHeader(header.to_string()));
        };

        let rows = lines[headline_at + 2..]
            .iter()
            .take_while(|line| line.starts_with('|'))
            .enumerate()
            .map(|(index, line)| parse_row(index + 1, line, headline, with_comparison))
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(PairingTableError::NoRows);
        }

        Ok(Some(Self {
            failure_summary,
            headline,
            previous_build,
            rows,
        }))
    }
}

fn is_headline(line: &str) -> bool {
    let line = line.trim_end();
    line.ends_with(':') && line.contains(HEADLINE_SUFFIX)
}

fn parse_headline(line: &str) -> Result<(Headline, String), PairingTableError> {
    let line = line.trim_end();
    let (word, rest) = line
        .split_once(HEADLINE_SUFFIX)
        .ok_or_else(|| PairingTableError::UnknownHeadline(line.to_string()))?;
    let headline = Headline::parse(word.trim())?;
    let build = rest.strip_suffix(':').unwrap_or(rest).trim();
    if build.is_empty() {
        return Err(PairingTableError::MissingBuild);
    }
    Ok((headline, build.to_string()))
}

fn parse_row(
    row: usize,
    line: &str,
    headline: Headline,
    with_comparison: bool,
) -> Result<PairingRow, PairingTableError> {
    let line = line.trim_end();
    let inner = line
        .strip_prefix('|')
        .and_then(|rest| rest.strip_suffix('|'))
        .unwrap_or(line);
    let cells = split_cells(inner);

    let expected = if with_comparison { 5 } else { 4 };
    if cells.len() != expected {
        return Err(PairingTableError::CellCount {
            row,
            expected,
            found: cells.len(),
        });
    }

    let arches: Vec<String> = cells[0]
        .split(',')
        .map(str::trim)
        .filter(|arch| !arch.is_empty())
        .map(str::to_string)
        .collect();
    if arches.is_empty() {
        return Err(PairingTableError::NoArches { row });
    }

    let link = |cell: &str| {
        RunLink::parse(cell.trim()).ok_or_else(|| PairingTableError::BadLink {
            row,
            cell: cell.to_string(),
        })
    };
    let original = link(&cells[1])?;
    let reproduction = link(&cells[2])?;

    let status = cells[3].trim().to_string();
    if !is_known_status(headline, &status) {
        return Err(PairingTableError::UnknownStatus { row, word: status });
    }

    Ok(PairingRow {
        arches,
        original,
        reproduction,
        status,
        comparison: with_comparison.then(|| cells[4].trim().to_string()),
    })
}

/// Split on `|` outside of `[...]` links.
fn split_cells(inner: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in inner.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '|' if depth == 0 => cells.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    cells.push(current);
    cells
}

fn is_known_status(headline: Headline, word: &str) -> bool {
    let is_state = word.parse::<TestRunState>().is_ok();
    match headline {
        Headline::Reproducing => is_state,
        Headline::Reproduced | Headline::FailedToReproduce => {
            is_state || word.parse::<TestRunResult>().is_ok()
        }
    }
}

fn sanitize_cell(text: &str) -> String {
    if text.starts_with('[') {
        return text.replace('\n', " ");
    }
    text.replace('|', "/").replace('\n', " ")
}
