use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::cycle_check::has_cycle;
use crate::task::Task;
use crate::WharfError;

/// An immutable, validated task DAG. Construction rejects duplicate names,
/// references to absent tasks, and cycles; no partial graph is ever returned.
/// Per-run state lives in the engine, so one graph can back many runs.
#[derive(Debug)]
pub struct Graph {
    tasks: HashMap<String, Arc<Task>>,
    upstream: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    in_degrees: HashMap<String, u32>,
}

impl Graph {
    /// Builds a graph from tasks and extra edges. Each edge is
    /// `(upstream, downstream)` and is merged with the upstream sets the
    /// tasks declare themselves.
    pub fn build(tasks: Vec<Task>, edges: Vec<(String, String)>) -> Result<Self, WharfError> {
        let mut map: HashMap<String, Arc<Task>> = HashMap::new();
        for task in tasks {
            let name = task.name().to_string();
            if map.insert(name.clone(), Arc::new(task)).is_some() {
                return Err(WharfError::DuplicateTask(name));
            }
        }

        // Deduplicated, ordered upstream sets per task.
        let mut upstream_sets: HashMap<String, BTreeSet<String>> =
            map.keys().map(|name| (name.clone(), BTreeSet::new())).collect();
        for (name, task) in &map {
            for dep in task.upstream() {
                if let Some(set) = upstream_sets.get_mut(name) {
                    set.insert(dep.clone());
                }
            }
        }
        for (up, down) in edges {
            match upstream_sets.get_mut(&down) {
                Some(set) => {
                    set.insert(up);
                }
                None => {
                    return Err(WharfError::UnknownDependency {
                        task: down,
                        upstream: up,
                    });
                }
            }
        }

        for (name, deps) in &upstream_sets {
            for dep in deps {
                if !map.contains_key(dep) {
                    return Err(WharfError::UnknownDependency {
                        task: name.clone(),
                        upstream: dep.clone(),
                    });
                }
            }
        }

        let upstream: HashMap<String, Vec<String>> = upstream_sets
            .into_iter()
            .map(|(name, set)| (name, set.into_iter().collect()))
            .collect();

        if has_cycle(&upstream) {
            return Err(WharfError::Cycle);
        }

        let mut in_degrees = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (name, deps) in &upstream {
            in_degrees.insert(name.clone(), deps.len() as u32);
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }
        for children in dependents.values_mut() {
            children.sort();
        }

        Ok(Self {
            tasks: map,
            upstream,
            dependents,
            in_degrees,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    pub fn tasks(&self) -> &HashMap<String, Arc<Task>> {
        &self.tasks
    }

    pub fn upstream_of(&self, name: &str) -> &[String] {
        self.upstream.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn in_degrees(&self) -> HashMap<String, u32> {
        self.in_degrees.clone()
    }

    /// All tasks transitively downstream of `name`. This is the set skipped
    /// when `name` fails permanently; deterministic for a given topology.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.dependents_of(&current) {
                if out.insert(child.clone()) {
                    stack.push(child.clone());
                }
            }
        }
        out
    }
}
