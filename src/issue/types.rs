//! Issue data model.

use std::path::PathBuf;

/// The category directory an issue lives under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueType {
    Bugs,
    Features,
    Enhancements,
}

impl IssueType {
    /// The directory name under `.issues/` for this type.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Bugs => "bugs",
            Self::Features => "features",
            Self::Enhancements => "enhancements",
        }
    }

    /// The filename token (`BUG`, `FEAT`, `ENH`) used in `P<n>-<TYPE>-<num>-<slug>.md`.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Bugs => "BUG",
            Self::Features => "FEAT",
            Self::Enhancements => "ENH",
        }
    }

    /// Parse a directory name into an [`IssueType`].
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "bugs" => Some(Self::Bugs),
            "features" => Some(Self::Features),
            "enhancements" => Some(Self::Enhancements),
            _ => None,
        }
    }
}

/// An immutable, parsed issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    /// Path to the issue file on disk.
    pub path: PathBuf,
    /// Category this issue belongs to.
    pub issue_type: IssueType,
    /// Priority tier, 0 (highest) through 5 (lowest / default).
    pub priority: u8,
    /// Issue id, e.g. `"BUG-123"`.
    pub id: String,
    /// Title, either parsed from the body heading or humanized from the slug.
    pub title: String,
    /// Ordered list of ids that block this issue.
    pub blocked_by: Vec<String>,
    /// Ordered list of ids this issue blocks.
    pub blocks: Vec<String>,
}

impl Issue {
    /// Priority tier as used by the priority queue's sort key. Unknown or
    /// out-of-range priorities default to tier 5.
    #[must_use]
    pub const fn priority_tier(&self) -> u8 {
        if self.priority <= 5 { self.priority } else { 5 }
    }
}
