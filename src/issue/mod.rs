//! Issue parsing: filename-driven metadata plus body-derived title and
//! dependency lists.

mod parser;
mod types;

pub use parser::{get_next_issue_number, load_all, parse_issue_file};
pub use types::{Issue, IssueType};
