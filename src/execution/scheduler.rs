//! Execution scheduler - determines which tasks to run next

use crate::core::{NodeId, RunState, TaskGraph, TaskStatus, TransitionError};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Strategy for scheduling task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute ready tasks one at a time
    Sequential,

    /// Execute all ready tasks in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent tasks)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Maximum number of tasks in flight at once
    pub fn max_concurrency(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Ready queue and dependency bookkeeping for one run.
///
/// The counters themselves live on the [`RunState`] nodes; the scheduler is
/// the only thing that decrements them.
pub struct ExecutionScheduler {
    graph: Arc<TaskGraph>,
    strategy: SchedulingStrategy,
    ready: VecDeque<NodeId>,
}

impl ExecutionScheduler {
    pub fn new(graph: Arc<TaskGraph>, strategy: SchedulingStrategy) -> Self {
        Self {
            graph,
            strategy,
            ready: VecDeque::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Mark every node without dependencies `Ready`
    pub fn seed(&mut self, state: &mut RunState) -> Result<Vec<NodeId>, TransitionError> {
        let roots = self.graph.roots();
        for &id in &roots {
            state.mark_ready(id)?;
            self.ready.push_back(id);
        }
        Ok(roots)
    }

    /// Take as many ready nodes as the strategy allows next to `running`
    pub fn next_ready(&mut self, running: usize) -> Vec<NodeId> {
        let capacity = self.strategy.max_concurrency().saturating_sub(running);
        let take = capacity.min(self.ready.len());
        self.ready.drain(..take).collect()
    }

    /// Nodes waiting for a free slot
    pub fn queued(&self) -> usize {
        self.ready.len()
    }

    /// A node finished `Succeeded` or `Cached`; returns dependents that became ready
    pub fn complete(
        &mut self,
        id: NodeId,
        state: &mut RunState,
    ) -> Result<Vec<NodeId>, TransitionError> {
        let mut newly_ready = Vec::new();

        for &dependent in &self.graph.node(id).dependents {
            if state.status_of(dependent) != TaskStatus::Pending {
                continue;
            }
            if state.resolve_dependency(dependent) == 0 {
                state.mark_ready(dependent)?;
                self.ready.push_back(dependent);
                newly_ready.push(dependent);
            }
        }

        if !newly_ready.is_empty() {
            debug!(
                "{} unblocked {} task(s)",
                self.graph.node(id).name(),
                newly_ready.len()
            );
        }

        Ok(newly_ready)
    }

    /// A node failed; every transitive dependent not yet terminal is skipped
    pub fn fail(&mut self, id: NodeId, state: &mut RunState) -> Result<Vec<NodeId>, TransitionError> {
        let failed = self.graph.node(id).name().to_string();
        let mut skipped = Vec::new();

        for descendant in self.graph.descendants(id) {
            if state.status_of(descendant).is_terminal() {
                continue;
            }
            state.mark_skipped(descendant, &failed)?;
            self.ready.retain(|&queued| queued != descendant);
            skipped.push(descendant);
        }

        Ok(skipped)
    }
}
