//! Min-heap priority queue of issues, keyed by `(priority_tier, id)`.
//!
//! `requeue` is used by both the overlap deferral path and conflict-retry
//! paths: it re-inserts an issue with its priority tier demoted, so issues
//! that keep colliding sink below fresher work without starving forever
//! (tier is clamped at 5, the lowest tier).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::issue::Issue;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    tier: u8,
    id: String,
    issue: Issue,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.tier, &self.id).cmp(&(other.tier, &other.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of issues ordered by `(priority_tier, id)`, lowest first.
#[derive(Clone, Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Reverse<Entry>>,
}

impl PriorityQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Push an issue at its natural priority tier.
    pub fn push(&mut self, issue: Issue) {
        let tier = issue.priority_tier();
        let id = issue.id.clone();
        self.heap.push(Reverse(Entry { tier, id, issue }));
    }

    /// Pop the highest-priority (lowest tier, then lowest id) issue.
    pub fn pop(&mut self) -> Option<Issue> {
        self.heap.pop().map(|Reverse(entry)| entry.issue)
    }

    /// Look at the next issue to be popped without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Issue> {
        self.heap.peek().map(|Reverse(entry)| &entry.issue)
    }

    /// Re-insert `issue` with its priority tier demoted by `demote` (capped
    /// at tier 5, the lowest).
    pub fn requeue(&mut self, mut issue: Issue, demote: u8) {
        issue.priority = issue.priority_tier().saturating_add(demote).min(5);
        self.push(issue);
    }

    /// Drain the queue into a vec, in pop order. Primarily for tests and
    /// status reporting.
    #[must_use]
    pub fn drain_ordered(mut self) -> Vec<Issue> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(issue) = self.pop() {
            out.push(issue);
        }
        out
    }
}
