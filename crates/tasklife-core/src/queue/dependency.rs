//! Dependency graph between queued operations.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

/// Dependency graph for tracking unfinished dependencies.
///
/// Edges are removed as dependencies complete, so a task with no forward
/// edges is ready as far as the graph is concerned.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on (waits for)
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it (waiting tasks)
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: `task` depends on `depends_on`.
    ///
    /// Example: add_dependency(task_b, task_a) means "B waits for A"
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// Add a dependency unless it would close a cycle.
    ///
    /// On `Err` the graph is unchanged and the cycle is returned.
    pub fn try_add_dependency(
        &mut self,
        task: TaskId,
        depends_on: TaskId,
    ) -> Result<(), Vec<TaskId>> {
        let existed = self
            .edges
            .get(&task)
            .is_some_and(|deps| deps.contains(&depends_on));
        self.add_dependency(task, depends_on);
        if let Some(cycle) = self.detect_cycle() {
            if !existed {
                self.remove_dependency(task, depends_on);
            }
            return Err(cycle);
        }
        Ok(())
    }

    /// Remove a dependency: `task` no longer depends on `depends_on`.
    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Remove `completed_task` from the graph and return the tasks that were
    /// waiting for it and now have no remaining dependencies.
    pub fn resolve(&mut self, completed_task: TaskId) -> Vec<TaskId> {
        let waiting = self.get_waiting_tasks(completed_task);
        let mut unblocked = Vec::new();
        for task in waiting {
            self.remove_dependency(task, completed_task);
            if !self.has_dependencies(task) {
                unblocked.push(task);
            }
        }
        unblocked
    }

    /// Tasks waiting for `task`, even if they have other dependencies too.
    pub fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Detect a cycle in the dependency graph.
    ///
    /// Three-color DFS over forward edges, O(V + E). Returns the first cycle
    /// found as a path that starts and ends on the same task, or None if the
    /// graph is acyclic.
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut colors: HashMap<TaskId, Color> = HashMap::new();
        let mut path = Vec::new();
        for &start in self.edges.keys() {
            if colors.contains_key(&start) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(start, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: TaskId,
        colors: &mut HashMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        if let Some(deps) = self.edges.get(&node) {
            for &dep in deps {
                match colors.get(&dep) {
                    Some(Color::Gray) => {
                        let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    None => {
                        if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }
}
