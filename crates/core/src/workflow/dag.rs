use crate::error::DagError;
use crate::types::{StepKey, WorkflowStep};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use std::collections::{HashMap, HashSet};

/// Validate that a step list forms a legal DAG.
///
/// Checks run in a fixed order and the first problem found is returned:
/// duplicate keys, then dependencies on undeclared keys, then cycles
/// (including a step depending on itself).
pub fn validate(steps: &[WorkflowStep]) -> Result<(), DagError> {
    let mut declared: HashSet<&StepKey> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !declared.insert(&step.step_key) {
            return Err(DagError::DuplicateStepKey {
                step_key: step.step_key.clone(),
            });
        }
    }

    for step in steps {
        if let Some(missing) = step.depends_on.iter().find(|d| !declared.contains(d)) {
            return Err(DagError::MissingDependency {
                step_key: step.step_key.clone(),
                dependency: missing.clone(),
            });
        }
    }

    detect_cycle(steps)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search over the `depends_on` edges. Keys are known to be unique
/// and every dependency resolvable at this point.
fn detect_cycle(steps: &[WorkflowStep]) -> Result<(), DagError> {
    let index: HashMap<&StepKey, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (&s.step_key, i))
        .collect();

    let adjacency: Vec<Vec<usize>> = steps
        .iter()
        .map(|s| s.depends_on.iter().map(|d| index[d]).collect())
        .collect();

    let mut marks = vec![Mark::Unvisited; steps.len()];

    for root in 0..steps.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (node, next edge to explore)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(frame) = stack.last_mut() {
            let (node, edge) = *frame;

            if edge == adjacency[node].len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let next = adjacency[node][edge];
            match marks[next] {
                Mark::OnStack => {
                    return Err(DagError::CycleDetected {
                        from: steps[node].step_key.clone(),
                        to: steps[next].step_key.clone(),
                    });
                }
                Mark::Unvisited => {
                    marks[next] = Mark::OnStack;
                    stack.push((next, 0));
                }
                Mark::Done => {}
            }
        }
    }

    Ok(())
}

/// Validated workflow graph used to order step execution
pub struct WorkflowDag {
    graph: DiGraph<WorkflowStep, ()>,
    step_indices: HashMap<StepKey, NodeIndex>,
}

impl WorkflowDag {
    /// Validate the steps and build the dependency graph
    pub fn build(steps: &[WorkflowStep]) -> Result<Self, DagError> {
        validate(steps)?;

        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in steps {
            let node = graph.add_node(step.clone());
            step_indices.insert(step.step_key.clone(), node);
        }

        // Edge from dependency to dependent (dep -> step)
        for step in steps {
            let step_idx = step_indices[&step.step_key];
            for dep in &step.depends_on {
                graph.add_edge(step_indices[dep], step_idx, ());
            }
        }

        Ok(Self {
            graph,
            step_indices,
        })
    }

    /// Steps in topological order (dependencies first)
    pub fn topological_order(&self) -> Vec<WorkflowStep> {
        let mut topo = Topo::new(&self.graph);
        let mut steps = Vec::with_capacity(self.graph.node_count());

        while let Some(node) = topo.next(&self.graph) {
            steps.push(self.graph[node].clone());
        }

        steps
    }

    /// Direct dependencies of a step, or `None` for an unknown key
    pub fn dependencies(&self, step_key: &StepKey) -> Option<Vec<StepKey>> {
        self.neighbors(step_key, petgraph::Direction::Incoming)
    }

    /// Steps that directly depend on the given step
    pub fn dependents(&self, step_key: &StepKey) -> Option<Vec<StepKey>> {
        self.neighbors(step_key, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, step_key: &StepKey, dir: petgraph::Direction) -> Option<Vec<StepKey>> {
        let node = self.step_indices.get(step_key)?;
        Some(
            self.graph
                .neighbors_directed(*node, dir)
                .map(|n| self.graph[n].step_key.clone())
                .collect(),
        )
    }

    /// Whether every dependency of the step is in `completed`
    pub fn can_execute(&self, step_key: &StepKey, completed: &HashSet<StepKey>) -> bool {
        self.dependencies(step_key)
            .is_some_and(|deps| deps.iter().all(|d| completed.contains(d)))
    }

    /// Steps with no dependencies
    pub fn entry_steps(&self) -> Vec<WorkflowStep> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
