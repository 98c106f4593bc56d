//! Graph checks over process definitions.
//!
//! Uses `petgraph` to model flows as a directed graph. A depth-first search
//! from the start event finds unreachable tasks, and a topological sort over
//! the call-activity graph rejects recursive models.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use tasklane_types::definition::{ProcessDefinition, ProcessModel, TaskKind};

use super::definition::ModelError;

/// Verify every task of `process` is reachable from its start event.
///
/// Boundary events count as reachable through the activity they attach to.
pub fn check_reachability(process: &ProcessDefinition) -> Result<(), ModelError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = process
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), graph.add_node(t.id.as_str())))
        .collect();

    for flow in &process.flows {
        if let (Some(&from), Some(&to)) = (
            index.get(flow.source.as_str()),
            index.get(flow.target.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }
    for task in &process.tasks {
        if let TaskKind::BoundaryEvent { attached_to, .. } = &task.kind {
            if let Some(&from) = index.get(attached_to.as_str()) {
                graph.add_edge(from, index[task.id.as_str()], ());
            }
        }
    }

    let Some(start) = process.start_event() else {
        return Err(ModelError::ValidationError(format!(
            "process '{}' has no start event",
            process.id
        )));
    };

    let mut reached = vec![false; graph.node_count()];
    let mut dfs = Dfs::new(&graph, index[start.id.as_str()]);
    while let Some(node) = dfs.next(&graph) {
        reached[node.index()] = true;
    }

    if let Some(task) = process
        .tasks
        .iter()
        .find(|t| !reached[index[t.id.as_str()].index()])
    {
        return Err(ModelError::ValidationError(format!(
            "process '{}': task '{}' is unreachable from the start event",
            process.id, task.id
        )));
    }
    Ok(())
}

/// Reject models whose call activities (directly or transitively) call themselves.
pub fn check_call_cycles(model: &ProcessModel) -> Result<(), ModelError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = model
        .processes
        .iter()
        .map(|p| (p.id.as_str(), graph.add_node(p.id.as_str())))
        .collect();

    for process in &model.processes {
        for task in &process.tasks {
            if let Some(called) = task.kind.spawned_process() {
                if let Some(&to) = index.get(called) {
                    graph.add_edge(index[process.id.as_str()], to, ());
                }
            }
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        ModelError::CallCycle(format!(
            "process '{}' calls itself",
            graph[cycle.node_id()]
        ))
    })?;
    Ok(())
}
