//! Parsing issue files from `.issues/{bugs,features,enhancements}/`.
//!
//! Filenames are authoritative: `P<n>-<TYPE>-<num>-<slug>.md`. The body only
//! supplies the title (when a matching `# ID: Title` heading exists) and the
//! `Blocked By` / `Blocks` dependency lists.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::LlpError;
use crate::issue::types::{Issue, IssueType};

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P(\d+)-([A-Z]+)-(\d+)-(.+)\.md$").expect("static regex"));

static ISSUE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+-\d+").expect("static regex"));

/// Parse a single issue file.
///
/// # Errors
/// Returns [`LlpError::IssueParse`] if the filename doesn't match the
/// conventional pattern or the file can't be read.
pub fn parse_issue_file(path: &Path, issue_type: IssueType) -> Result<Issue, LlpError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LlpError::IssueParse {
            path: path.to_owned(),
            detail: "path has no valid UTF-8 filename".to_owned(),
        })?;

    let caps = FILENAME_RE.captures(file_name).ok_or_else(|| LlpError::IssueParse {
        path: path.to_owned(),
        detail: format!("filename '{file_name}' does not match P<n>-<TYPE>-<num>-<slug>.md"),
    })?;

    let priority: u8 = caps[1].parse().unwrap_or(5);
    let type_token = caps[2].to_owned();
    let num = &caps[3];
    let slug = &caps[4];
    let id = format!("{type_token}-{num}");

    let body = std::fs::read_to_string(path)?;

    let title = parse_title(&body, &id).unwrap_or_else(|| humanize_slug(slug));
    let blocked_by = parse_id_section(&body, "Blocked By");
    let blocks = parse_id_section(&body, "Blocks");

    Ok(Issue {
        path: path.to_owned(),
        issue_type,
        priority,
        id,
        title,
        blocked_by,
        blocks,
    })
}

/// Discover and parse every issue under `issues_root/{bugs,features,enhancements}`.
///
/// Files that fail to parse are skipped with the error attached to the
/// returned `errors` vec rather than aborting the whole scan — a single
/// malformed issue should not block scheduling for the rest of the backlog.
#[must_use]
pub fn load_all(issues_root: &Path) -> (Vec<Issue>, Vec<LlpError>) {
    let mut issues = Vec::new();
    let mut errors = Vec::new();

    for issue_type in [IssueType::Bugs, IssueType::Features, IssueType::Enhancements] {
        let dir = issues_root.join(issue_type.dir_name());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match parse_issue_file(&path, issue_type) {
                Ok(issue) => issues.push(issue),
                Err(err) => errors.push(err),
            }
        }
    }

    (issues, errors)
}

/// Scan every category directory plus the completed directory for the
/// highest existing issue number, returning `max + 1` (or `1` if none
/// exist). Numbers are globally unique across all types.
#[must_use]
pub fn get_next_issue_number(issues_root: &Path) -> u64 {
    let mut dirs: Vec<PathBuf> = vec![
        issues_root.join(IssueType::Bugs.dir_name()),
        issues_root.join(IssueType::Features.dir_name()),
        issues_root.join(IssueType::Enhancements.dir_name()),
        issues_root.join("completed"),
    ];
    dirs.retain(|d| d.exists());

    let max = dirs
        .iter()
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flatten()
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let caps = FILENAME_RE.captures(name)?;
            caps[3].parse::<u64>().ok()
        })
        .max();

    max.map_or(1, |m| m + 1)
}

/// Find the first `# <id>: <title>` heading and return its title.
fn parse_title(body: &str, id: &str) -> Option<String> {
    let prefix = format!("# {id}:");
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(&prefix) {
            let title = rest.trim();
            if !title.is_empty() {
                return Some(title.to_owned());
            }
        }
    }
    None
}

/// Turn a filename slug (`fix-null-deref`) into a human title (`Fix Null Deref`).
fn humanize_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract issue-id tokens from the `## <heading>` section, ignoring fenced
/// code blocks. A section whose only content is the literal word `None`
/// (case-insensitive) yields an empty list.
fn parse_id_section(body: &str, heading: &str) -> Vec<String> {
    let lines: Vec<&str> = extract_section_lines(body, heading);
    if lines.len() == 1 && lines[0].trim().trim_start_matches(['-', '*']).trim() == "None" {
        return Vec::new();
    }

    let mut ids = Vec::new();
    for m in ISSUE_ID_RE.find_iter(&lines.join("\n")) {
        let token = m.as_str().to_owned();
        if !ids.contains(&token) {
            ids.push(token);
        }
    }
    ids
}

/// Collect lines belonging to a `## <heading>` section (case-insensitive
/// match on heading text), stopping at the next `##` heading or EOF.
/// Lines inside fenced code blocks (delimited by ``` ```) are excluded.
fn extract_section_lines<'a>(body: &'a str, heading: &str) -> Vec<&'a str> {
    let mut lines = Vec::new();
    let mut in_section = false;
    let mut in_fence = false;
    let target = heading.to_lowercase();

    for line in body.lines() {
        let trimmed = line.trim();

        if let Some(h) = trimmed.strip_prefix("## ") {
            if in_section {
                break;
            }
            in_section = h.trim().to_lowercase() == target;
            continue;
        }

        if !in_section {
            continue;
        }

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        lines.push(line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_issue(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_filename_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_issue(
            dir.path(),
            "P2-BUG-042-null-deref.md",
            "# BUG-042: Null deref in parser\n\n## Summary\n\nCrashes on empty input.\n",
        );
        let issue = parse_issue_file(&path, IssueType::Bugs).unwrap();
        assert_eq!(issue.id, "BUG-042");
        assert_eq!(issue.priority, 2);
        assert_eq!(issue.title, "Null deref in parser");
    }

    #[test]
    fn title_falls_back_to_humanized_slug() {
        let dir = TempDir::new().unwrap();
        let path = write_issue(dir.path(), "P1-FEAT-007-add-retry-logic.md", "no heading here\n");
        let issue = parse_issue_file(&path, IssueType::Features).unwrap();
        assert_eq!(issue.title, "Add Retry Logic");
    }

    #[test]
    fn blocked_by_and_blocks_parsed_from_list_items() {
        let dir = TempDir::new().unwrap();
        let body = "# FEAT-002: Second feature\n\n## Blocked By\n\n- FEAT-001\n- **BUG-003**: fixed upstream\n\n## Blocks\n\n- FEAT-010\n\n## Summary\n\nbody text\n";
        let path = write_issue(dir.path(), "P3-FEAT-002-second.md", body);
        let issue = parse_issue_file(&path, IssueType::Features).unwrap();
        assert_eq!(issue.blocked_by, vec!["FEAT-001", "BUG-003"]);
        assert_eq!(issue.blocks, vec!["FEAT-010"]);
    }

    #[test]
    fn literal_none_yields_empty_list() {
        let dir = TempDir::new().unwrap();
        let body = "# FEAT-003: Third\n\n## Blocked By\n\nNone\n\n## Summary\n\ntext\n";
        let path = write_issue(dir.path(), "P3-FEAT-003-third.md", body);
        let issue = parse_issue_file(&path, IssueType::Features).unwrap();
        assert!(issue.blocked_by.is_empty());
    }

    #[test]
    fn fenced_code_blocks_are_ignored() {
        let dir = TempDir::new().unwrap();
        let body = "# BUG-010: Tenth\n\n## Blocked By\n\n```\nFAKE-001\n```\n- BUG-009\n\n## Summary\n\ntext\n";
        let path = write_issue(dir.path(), "P3-BUG-010-tenth.md", body);
        let issue = parse_issue_file(&path, IssueType::Bugs).unwrap();
        assert_eq!(issue.blocked_by, vec!["BUG-009"]);
    }

    #[test]
    fn filename_conflict_with_body_heading_filename_wins() {
        let dir = TempDir::new().unwrap();
        // body claims a different id than the filename; filename is authoritative.
        let body = "# BUG-999: Wrong id in body\n\n## Summary\n\ntext\n";
        let path = write_issue(dir.path(), "P1-BUG-011-eleventh.md", body);
        let issue = parse_issue_file(&path, IssueType::Bugs).unwrap();
        assert_eq!(issue.id, "BUG-011");
        // no "# BUG-011: ..." heading exists, so title falls back to the slug.
        assert_eq!(issue.title, "Eleventh");
    }

    #[test]
    fn malformed_filename_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_issue(dir.path(), "not-conventional.md", "whatever\n");
        let err = parse_issue_file(&path, IssueType::Bugs).unwrap_err();
        assert!(matches!(err, LlpError::IssueParse { .. }));
    }

    #[test]
    fn next_issue_number_scans_all_categories_and_completed() {
        let root = TempDir::new().unwrap();
        for (sub, name) in [
            ("bugs", "P1-BUG-001-a.md"),
            ("features", "P1-FEAT-005-b.md"),
            ("completed", "P1-ENH-012-c.md"),
        ] {
            let dir = root.path().join(sub);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), "placeholder\n").unwrap();
        }
        assert_eq!(get_next_issue_number(root.path()), 13);
    }

    #[test]
    fn next_issue_number_defaults_to_one_when_empty() {
        let root = TempDir::new().unwrap();
        assert_eq!(get_next_issue_number(root.path()), 1);
    }
}
