//! Task graph construction and validation
//!
//! [`TaskGraph::build`] resolves every `dependent_tasks` reference to a node,
//! rejects unknown references and cycles, and precomputes the in-degrees and
//! reverse edges the scheduler needs. The resulting graph is immutable.

use crate::core::error::SpecError;
use crate::core::pipeline::{Executor, Pipeline, Task};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Index of a node inside a [`TaskGraph`]
pub type NodeId = usize;

/// A resolved task with its edges
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub task: Task,
    pub executor: Executor,
    /// Direct dependencies (edges to upstream nodes)
    pub dependencies: Vec<NodeId>,
    /// Direct dependents (reverse edges)
    pub dependents: Vec<NodeId>,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        &self.task.name
    }

    /// Number of dependencies that must finish before this node is ready
    pub fn in_degree(&self) -> usize {
        self.dependencies.len()
    }
}

/// Immutable DAG of a pipeline's tasks
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pipeline: Arc<Pipeline>,
    nodes: Vec<GraphNode>,
    index: HashMap<String, NodeId>,
    topological_order: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl TaskGraph {
    /// Build and validate the graph of a pipeline
    pub fn build(pipeline: &Pipeline) -> Result<Self, SpecError> {
        let pipeline = Arc::new(pipeline.clone());

        let index: HashMap<String, NodeId> = pipeline
            .tasks
            .iter()
            .enumerate()
            .map(|(id, task)| (task.name.clone(), id))
            .collect();

        let mut nodes = Vec::with_capacity(pipeline.tasks.len());
        for (id, task) in pipeline.tasks.iter().enumerate() {
            let executor = pipeline.executor_for(task).cloned().ok_or_else(|| {
                SpecError::UnknownExecutor {
                    task: task.name.clone(),
                    executor: task.executor_label.clone(),
                }
            })?;

            let mut dependencies = Vec::with_capacity(task.dependent_tasks.len());
            for dep in &task.dependent_tasks {
                let dep_id = *index.get(dep).ok_or_else(|| SpecError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                })?;
                if !dependencies.contains(&dep_id) {
                    dependencies.push(dep_id);
                }
            }

            nodes.push(GraphNode {
                id,
                task: task.clone(),
                executor,
                dependencies,
                dependents: Vec::new(),
            });
        }

        for id in 0..nodes.len() {
            for dep in nodes[id].dependencies.clone() {
                nodes[dep].dependents.push(id);
            }
        }

        let topological_order = Self::check_cycles(&nodes)?;

        Ok(Self {
            pipeline,
            nodes,
            index,
            topological_order,
        })
    }

    /// Depth-first traversal with three-color marking.
    ///
    /// Returns a dependencies-first order on success. Reaching an in-progress
    /// node means the current path loops back on itself; the error lists the
    /// path from that node, in dependency direction, ending where it started.
    fn check_cycles(nodes: &[GraphNode]) -> Result<Vec<NodeId>, SpecError> {
        let mut marks = vec![Mark::Unvisited; nodes.len()];
        let mut order = Vec::with_capacity(nodes.len());
        // Current path: each node with the index of its next dependency to visit
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        for root in 0..nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let (id, next) = *top;
                let Some(&dep) = nodes[id].dependencies.get(next) else {
                    stack.pop();
                    marks[id] = Mark::Done;
                    order.push(id);
                    continue;
                };
                top.1 += 1;

                match marks[dep] {
                    Mark::Done => {}
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        stack.push((dep, 0));
                    }
                    Mark::InProgress => {
                        let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|&(n, _)| nodes[n].task.name.clone())
                            .collect();
                        cycle.push(nodes[dep].task.name.clone());
                        return Err(SpecError::CyclicDependency { cycle });
                    }
                }
            }
        }

        Ok(order)
    }

    /// The pipeline this graph was built from
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    /// Look up a node by task name
    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Nodes with no dependencies, in declaration order
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Nodes nothing depends on, in declaration order
    pub fn sinks(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.dependents.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Dependencies-first execution order (deterministic)
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }

    /// All nodes reachable through dependent edges, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.nodes[id].dependents.iter().copied().collect();
        let mut result = Vec::new();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                result.push(next);
                queue.extend(self.nodes[next].dependents.iter().copied());
            }
        }

        result
    }
}
