//! End-to-end orchestrator run against a real git repository: two issues
//! with a dependency edge, driven through worktree creation, a fake agent,
//! and merge-back into mainline.

use std::path::Path;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use llp::config::{OverlapConfig, WorkersConfig};
use llp::fsm::ActionResult;
use llp::graph::DependencyGraph;
use llp::issue::{Issue, IssueType};
use llp::orchestrator::Orchestrator;
use llp::queue::PriorityQueue;
use llp::worker::AgentInvoker;
use llp_git::{GitLock, GitRepo};

struct FakeInvoker;

impl AgentInvoker for FakeInvoker {
    fn validate(&self, _target: &str, _worktree: &Path, _timeout: Duration) -> ActionResult {
        ActionResult {
            exit_code: Some(0),
            stdout: "## VERDICT\nREADY\n".to_owned(),
            stderr: String::new(),
            timed_out: false,
            launch_error: false,
        }
    }

    fn manage(&self, target: &str, _action: &str, worktree: &Path, _continuation_of: Option<&str>, _timeout: Duration) -> ActionResult {
        std::fs::write(worktree.join(format!("{target}.txt")), "done\n").expect("write into worktree");
        ActionResult {
            exit_code: Some(0),
            stdout: "## VERDICT\nCOMPLETED\n".to_owned(),
            stderr: String::new(),
            timed_out: false,
            launch_error: false,
        }
    }
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git").args(args).current_dir(dir).output().expect("git");
    assert!(out.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&out.stderr));
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    git(dir.path(), &["config", "user.email", "t@t.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "init"]);
    git(dir.path(), &["branch", "-M", "main"]);
    // Workers rebase onto `origin/<mainline>` before merge; point "origin"
    // at this same repo so that step has something to fetch from.
    git(dir.path(), &["remote", "add", "origin", &dir.path().display().to_string()]);
    dir
}

fn issue(id: &str, blocked_by: Vec<String>) -> Issue {
    Issue {
        path: std::path::PathBuf::from(format!("{id}.md")),
        issue_type: IssueType::Bugs,
        priority: 5,
        id: id.to_owned(),
        title: id.to_owned(),
        blocked_by,
        blocks: Vec::new(),
    }
}

#[test]
fn two_dependent_issues_run_sequentially_and_merge_into_mainline() {
    let repo_dir = init_repo();
    let repo_root = repo_dir.path();

    let issues = vec![issue("BUG-1", Vec::new()), issue("BUG-2", vec!["BUG-1".to_owned()])];
    let graph = DependencyGraph::from_issues(issues, &std::collections::HashSet::new());

    let mut queue = PriorityQueue::new();
    for issue in graph.issues() {
        queue.push(issue.clone());
    }

    let lock = Arc::new(GitLock::new(GitRepo::new(repo_root)));
    let workers = WorkersConfig {
        max_workers: 1,
        ..WorkersConfig::default()
    };
    let state_path = repo_root.join(".auto-state-bugs.json");

    let mut orchestrator = Orchestrator::new(
        queue,
        graph,
        lock,
        "main".to_owned(),
        Arc::new(FakeInvoker),
        workers,
        OverlapConfig::default(),
        state_path.clone(),
        Arc::new(AtomicBool::new(false)),
    );

    orchestrator.run();

    let state = orchestrator.state();
    assert!(state.failed_issue_ids.is_empty(), "unexpected failures: {:?}", state.failed_issue_ids);
    assert_eq!(state.completed_issue_ids.len(), 2);
    assert!(state.completed_issue_ids.contains(&"BUG-1".to_owned()));
    assert!(state.completed_issue_ids.contains(&"BUG-2".to_owned()));

    assert!(repo_root.join("BUG-1.txt").exists(), "BUG-1's change should have merged into mainline");
    assert!(repo_root.join("BUG-2.txt").exists(), "BUG-2's change should have merged into mainline");
    assert!(state_path.exists());
}
