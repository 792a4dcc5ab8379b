//! Sprint mode: wave-based execution over a fixed issue set, each wave run
//! as a contained [`Orchestrator`] pass that must fully complete before the
//! next wave starts.

use crate::graph::DependencyGraph;
use crate::orchestrator::Orchestrator;
use crate::queue::PriorityQueue;

/// Outcome of a full (possibly partial) sprint run.
#[derive(Clone, Debug, Default)]
pub struct SprintResult {
    pub waves_run: usize,
    pub waves_total: usize,
    pub completed_issue_ids: Vec<String>,
    pub failed_issue_ids: Vec<String>,
    /// Set if a wave finished with unfinished issues still outstanding
    /// (failed or interrupted), which halts the sprint before its last wave.
    pub stalled_at_wave: Option<usize>,
}

/// Run `graph`'s issues wave by wave. `build_orchestrator` is called once
/// per wave with that wave's issues queued and its label, and must return a
/// freshly constructed [`Orchestrator`] (the caller supplies the shared git
/// lock, agent invoker, and config via closure capture).
///
/// The next wave starts only once every issue in the current wave has
/// landed in `completed_issue_ids`; if any remain outstanding (failed or
/// merge-failed), the sprint halts and reports the wave it stalled at.
pub fn run_sprint(name: &str, graph: &DependencyGraph, mut build_orchestrator: impl FnMut(PriorityQueue, DependencyGraph, String) -> Orchestrator) -> SprintResult {
    let waves = graph.execution_waves();
    let mut result = SprintResult {
        waves_total: waves.len(),
        ..SprintResult::default()
    };

    for (index, wave) in waves.iter().enumerate() {
        let label = format!("{name}-wave-{}", index + 1);

        let mut queue = PriorityQueue::new();
        for id in wave {
            if let Some(issue) = graph.get(id) {
                queue.push(issue.clone());
            }
        }

        let wave_completed: std::collections::HashSet<String> = result.completed_issue_ids.iter().cloned().collect();
        let wave_graph = DependencyGraph::from_issues(wave.iter().filter_map(|id| graph.get(id).cloned()).collect(), &wave_completed);

        let mut orchestrator = build_orchestrator(queue, wave_graph, label);
        orchestrator.set_wave_label(format!("wave {}/{}", index + 1, waves.len()));
        orchestrator.run();

        result.waves_run = index + 1;
        result.completed_issue_ids.extend(orchestrator.state().completed_issue_ids.iter().cloned());
        result.failed_issue_ids.extend(orchestrator.state().failed_issue_ids.iter().cloned());

        let outstanding: Vec<&String> = wave.iter().filter(|id| !orchestrator.state().completed_issue_ids.iter().any(|c| c == *id)).collect();

        if !outstanding.is_empty() {
            result.stalled_at_wave = Some(index + 1);
            break;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Issue, IssueType};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn issue(id: &str, blocked_by: Vec<&str>) -> Issue {
        Issue {
            path: PathBuf::from(format!("{id}.md")),
            issue_type: IssueType::Features,
            priority: 3,
            id: id.to_owned(),
            title: id.to_owned(),
            blocked_by: blocked_by.into_iter().map(str::to_owned).collect(),
            blocks: Vec::new(),
        }
    }

    #[test]
    fn waves_reflect_dependency_order() {
        let issues = vec![issue("FEAT-1", vec![]), issue("FEAT-2", vec!["FEAT-1"]), issue("FEAT-3", vec!["FEAT-1"])];
        let graph = DependencyGraph::from_issues(issues, &HashSet::new());
        let waves = graph.execution_waves();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["FEAT-1".to_owned()]);
        let mut second = waves[1].clone();
        second.sort();
        assert_eq!(second, vec!["FEAT-2".to_owned(), "FEAT-3".to_owned()]);
    }
}
