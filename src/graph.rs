//! Dependency graph over issues: ready-set computation, topological order,
//! wave grouping, and cycle detection.
//!
//! Edges are id-keyed adjacency sets, not pointers — issues reference each
//! other only by id, and a blocker that's already completed is dropped
//! rather than retained as a dead edge.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::issue::Issue;

/// A dependency graph built from a snapshot of issues.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    issues: HashMap<String, Issue>,
    /// id -> ids that must complete before it (edges retained after
    /// dropping already-completed blockers and self-loops).
    blocked_by: HashMap<String, BTreeSet<String>>,
    /// id -> ids that this id blocks (reverse adjacency).
    blocks: HashMap<String, BTreeSet<String>>,
    /// Ids referenced in `blocked_by`/`blocks` that don't correspond to any
    /// known issue (active or completed).
    pub broken_refs: BTreeSet<String>,
}

/// A dependency cycle found by [`DependencyGraph::topological_sort`] or
/// [`DependencyGraph::detect_cycles`], in cycle order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle(pub Vec<String>);

impl DependencyGraph {
    /// Build a graph from a set of issues, given the set of already-
    /// completed issue ids. Blockers in `completed_ids` are not retained as
    /// edges; self-loops are skipped; references to unknown ids are
    /// recorded in `broken_refs` but not retained as edges.
    #[must_use]
    pub fn from_issues(issues: Vec<Issue>, completed_ids: &HashSet<String>) -> Self {
        let known: HashSet<String> = issues.iter().map(|i| i.id.clone()).chain(completed_ids.iter().cloned()).collect();

        let mut graph = Self {
            issues: HashMap::new(),
            blocked_by: HashMap::new(),
            blocks: HashMap::new(),
            broken_refs: BTreeSet::new(),
        };

        for issue in &issues {
            graph.blocked_by.entry(issue.id.clone()).or_default();
            graph.blocks.entry(issue.id.clone()).or_default();
        }

        for issue in &issues {
            for blocker in &issue.blocked_by {
                if blocker == &issue.id {
                    continue;
                }
                if completed_ids.contains(blocker) {
                    continue;
                }
                if !known.contains(blocker) {
                    graph.broken_refs.insert(blocker.clone());
                    continue;
                }
                graph.blocked_by.entry(issue.id.clone()).or_default().insert(blocker.clone());
                graph.blocks.entry(blocker.clone()).or_default().insert(issue.id.clone());
            }
        }

        for issue in issues {
            graph.issues.insert(issue.id.clone(), issue);
        }

        graph
    }

    /// All issues known to this graph.
    #[must_use]
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    /// Look up an issue by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.issues.get(id)
    }

    /// Blockers of `id` that are not yet in `completed`.
    #[must_use]
    pub fn blocking_issues(&self, id: &str, completed: &HashSet<String>) -> Vec<String> {
        self.blocked_by
            .get(id)
            .map(|set| set.iter().filter(|b| !completed.contains(*b)).cloned().collect())
            .unwrap_or_default()
    }

    fn sort_key<'a>(&'a self, id: &'a str) -> (u8, &'a str) {
        let tier = self.issues.get(id).map_or(5, Issue::priority_tier);
        (tier, id)
    }

    /// Issues whose blocker count (relative to `completed`) is zero,
    /// sorted by priority tier then id.
    #[must_use]
    pub fn ready_issues(&self, completed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .issues
            .keys()
            .filter(|id| !completed.contains(*id))
            .filter(|id| self.blocking_issues(id, completed).is_empty())
            .cloned()
            .collect();
        ready.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));
        ready
    }

    /// Kahn's algorithm. Returns the cycle (if any) as an error rather than
    /// a partial order.
    ///
    /// # Errors
    /// Returns a [`Cycle`] if the graph is not a DAG.
    pub fn topological_sort(&self) -> Result<Vec<String>, Cycle> {
        let mut in_degree: HashMap<&str, usize> = self
            .issues
            .keys()
            .map(|id| (id.as_str(), self.blocked_by.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));

        let mut order = Vec::with_capacity(self.issues.len());
        let mut queue = std::collections::VecDeque::from(ready);

        while let Some(id) = queue.pop_front() {
            order.push(id.to_owned());
            if let Some(dependents) = self.blocks.get(id) {
                let mut newly_ready = Vec::new();
                for dep in dependents {
                    if let Some(deg) = in_degree.get_mut(dep.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(dep.as_str());
                        }
                    }
                }
                newly_ready.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));
                for id in newly_ready {
                    // Insertion keeps overall queue roughly priority-ordered;
                    // exactness across waves isn't required by Kahn's.
                    queue.push_back(id);
                }
            }
        }

        if order.len() < self.issues.len() {
            let remaining: BTreeSet<String> = self.issues.keys().filter(|id| !order.contains(*id)).cloned().collect();
            let cycle = self.detect_cycles().into_iter().find(|c| c.0.iter().any(|id| remaining.contains(id)));
            return Err(cycle.unwrap_or(Cycle(remaining.into_iter().collect())));
        }

        Ok(order)
    }

    /// Iteratively strip the current ready-set until empty; each stripped
    /// set is a wave, ordered by priority then id within the wave.
    #[must_use]
    pub fn execution_waves(&self) -> Vec<Vec<String>> {
        let mut completed: HashSet<String> = HashSet::new();
        let mut waves = Vec::new();

        loop {
            let ready = self.ready_issues(&completed);
            if ready.is_empty() {
                break;
            }
            completed.extend(ready.iter().cloned());
            waves.push(ready);
        }

        waves
    }

    /// DFS with tri-coloring; returns every back-edge cycle found.
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Cycle> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> = self.issues.keys().map(|id| (id.as_str(), Color::White)).collect();
        let mut stack: Vec<&str> = Vec::new();
        let mut cycles = Vec::new();

        fn visit<'a>(
            id: &'a str,
            blocked_by: &'a HashMap<String, BTreeSet<String>>,
            color: &mut HashMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
            cycles: &mut Vec<Cycle>,
        ) {
            color.insert(id, Color::Gray);
            stack.push(id);

            if let Some(deps) = blocked_by.get(id) {
                for dep in deps {
                    match color.get(dep.as_str()).copied() {
                        Some(Color::White) | None => {
                            visit(dep.as_str(), blocked_by, color, stack, cycles);
                        }
                        Some(Color::Gray) => {
                            let start = stack.iter().position(|s| *s == dep.as_str()).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[start..].iter().map(|s| (*s).to_owned()).collect();
                            cycle.push(dep.clone());
                            cycles.push(Cycle(cycle));
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            color.insert(id, Color::Black);
        }

        let mut ids: Vec<&str> = self.issues.keys().map(String::as_str).collect();
        ids.sort_unstable();
        for id in ids {
            if color.get(id).copied() == Some(Color::White) {
                visit(id, &self.blocked_by, &mut color, &mut stack, &mut cycles);
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueType;
    use std::path::PathBuf;

    fn issue(id: &str, priority: u8, blocked_by: &[&str]) -> Issue {
        Issue {
            path: PathBuf::from(format!("{id}.md")),
            issue_type: IssueType::Features,
            priority,
            id: id.to_owned(),
            title: id.to_owned(),
            blocked_by: blocked_by.iter().map(|s| (*s).to_owned()).collect(),
            blocks: Vec::new(),
        }
    }

    #[test]
    fn ready_issues_excludes_blocked() {
        let issues = vec![issue("FEAT-001", 2, &[]), issue("FEAT-002", 2, &["FEAT-001"])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        assert_eq!(graph.ready_issues(&HashSet::new()), vec!["FEAT-001"]);

        let mut completed = HashSet::new();
        completed.insert("FEAT-001".to_owned());
        assert_eq!(graph.ready_issues(&completed), vec!["FEAT-002"]);
    }

    #[test]
    fn already_completed_blockers_are_not_retained_as_edges() {
        let mut completed = HashSet::new();
        completed.insert("FEAT-000".to_owned());
        let issues = vec![issue("FEAT-001", 2, &["FEAT-000"])];
        let graph = DependencyGraph::from_issues(issues, &completed);
        assert!(graph.blocking_issues("FEAT-001", &HashSet::new()).is_empty());
    }

    #[test]
    fn unknown_blocker_becomes_broken_ref_not_an_edge() {
        let issues = vec![issue("FEAT-001", 2, &["FEAT-999"])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        assert!(graph.broken_refs.contains("FEAT-999"));
        assert_eq!(graph.ready_issues(&HashSet::new()), vec!["FEAT-001"]);
    }

    #[test]
    fn self_loop_is_skipped() {
        let issues = vec![issue("FEAT-001", 2, &["FEAT-001"])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        assert_eq!(graph.ready_issues(&HashSet::new()), vec!["FEAT-001"]);
    }

    #[test]
    fn topological_sort_orders_blockers_first() {
        let issues = vec![issue("FEAT-002", 2, &["FEAT-001"]), issue("FEAT-001", 2, &[])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec!["FEAT-001", "FEAT-002"]);
    }

    #[test]
    fn topological_sort_detects_cycle() {
        let issues = vec![issue("A-1", 2, &["A-2"]), issue("A-2", 2, &["A-1"])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        let err = graph.topological_sort().unwrap_err();
        assert!(err.0.contains(&"A-1".to_owned()));
        assert!(err.0.contains(&"A-2".to_owned()));
    }

    #[test]
    fn execution_waves_groups_by_dependency_depth() {
        let issues = vec![
            issue("A-1", 2, &[]),
            issue("A-2", 2, &[]),
            issue("B-1", 2, &["A-1", "A-2"]),
        ];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        let waves = graph.execution_waves();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["A-1", "A-2"]);
        assert_eq!(waves[1], vec!["B-1"]);
    }

    #[test]
    fn detect_cycles_finds_all_back_edges() {
        let issues = vec![issue("A-1", 2, &["A-2"]), issue("A-2", 2, &["A-1"]), issue("B-1", 2, &[])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn ready_issues_sorted_by_priority_then_id() {
        let issues = vec![issue("B-2", 3, &[]), issue("A-1", 1, &[]), issue("C-3", 1, &[])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        assert_eq!(graph.ready_issues(&HashSet::new()), vec!["A-1", "C-3", "B-2"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::issue::IssueType;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn issue(id: &str, priority: u8, blocked_by: Vec<String>) -> Issue {
        Issue {
            path: PathBuf::from(format!("{id}.md")),
            issue_type: IssueType::Features,
            priority,
            id: id.to_owned(),
            title: id.to_owned(),
            blocked_by,
            blocks: Vec::new(),
        }
    }

    /// A DAG of up to 12 issues: issue `n` may only depend on issues with a
    /// smaller index, so the generated graph is acyclic by construction.
    fn arb_dag() -> impl Strategy<Value = Vec<Issue>> {
        (1usize..12).prop_flat_map(|n| {
            let priorities = prop::collection::vec(0u8..6, n);
            let edge_strategies: Vec<_> = (0..n).map(|i| prop::collection::hash_set(0..i.max(1), 0..=i.min(3))).collect();
            (priorities, edge_strategies).prop_map(move |(priorities, edges)| {
                (0..n)
                    .map(|i| {
                        let blocked_by = edges[i].iter().filter(|&&j| j < i).map(|j| format!("N-{j}")).collect();
                        issue(&format!("N-{i}"), priorities[i], blocked_by)
                    })
                    .collect()
            })
        })
    }

    proptest! {
        // Every issue must end up in exactly one wave, waves must jointly
        // cover the whole issue set with no duplicates, and an issue's wave
        // must come strictly after every one of its blockers' waves.
        #[test]
        fn prop_execution_waves_partition_every_issue_in_dependency_order(issues in arb_dag()) {
            let ids: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();
            let graph = DependencyGraph::from_issues(issues, &HashSet::new());
            let waves = graph.execution_waves();

            let mut seen = HashSet::new();
            let mut wave_of: HashMap<String, usize> = HashMap::new();
            for (idx, wave) in waves.iter().enumerate() {
                for id in wave {
                    prop_assert!(seen.insert(id.clone()), "id {id} appeared in more than one wave");
                    wave_of.insert(id.clone(), idx);
                }
            }
            prop_assert_eq!(seen, ids, "every issue must appear in exactly one wave");

            for id in wave_of.keys() {
                for blocker in graph.blocking_issues(id, &HashSet::new()) {
                    prop_assert!(
                        wave_of[&blocker] < wave_of[id],
                        "blocker {blocker} must be scheduled in an earlier wave than {id}"
                    );
                }
            }
        }
    }
}
