//! Source excerpts around a line

use serde::Serialize;
use std::path::PathBuf;

/// Where a line sits relative to the line of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Before,
    Match,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextLine {
    /// Zero-based, as in LSP positions
    pub line_number: u32,
    pub content: String,
    pub kind: LineKind,
}

/// Consecutive lines of one file around a matched line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedLines {
    pub path: PathBuf,
    pub lines: Vec<TextLine>,
}

impl MatchedLines {
    /// The matched line itself
    pub fn matched(&self) -> Option<&TextLine> {
        self.lines.iter().find(|line| line.kind == LineKind::Match)
    }
}

/// Cut `line` plus up to `before`/`after` neighbours out of `text`
///
/// `None` when the file has no such line.
pub fn lines_around(
    path: impl Into<PathBuf>,
    text: &str,
    line: u32,
    before: u32,
    after: u32,
) -> Option<MatchedLines> {
    let all: Vec<&str> = text.lines().collect();
    let target = line as usize;
    if target >= all.len() {
        return None;
    }

    let start = target.saturating_sub(before as usize);
    let end = target.saturating_add(after as usize).min(all.len() - 1);
    let lines = (start..=end)
        .map(|index| TextLine {
            line_number: index as u32,
            content: all[index].to_string(),
            kind: match index.cmp(&target) {
                std::cmp::Ordering::Less => LineKind::Before,
                std::cmp::Ordering::Equal => LineKind::Match,
                std::cmp::Ordering::Greater => LineKind::After,
            },
        })
        .collect();

    Some(MatchedLines {
        path: path.into(),
        lines,
    })
}
