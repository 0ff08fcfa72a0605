// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::model::ConfigFile;
use crate::context::Template;
use crate::dag::task::{Task, TaskId};
use crate::errors::{IngestError, Result};

/// Internal node structure: the task, its parsed template and its immediate
/// dependents.
#[derive(Debug, Clone)]
struct GraphNode {
    task: Task,
    template: Template,
    /// Direct downstream tasks, sorted by id.
    downstream: Vec<TaskId>,
}

/// Immutable dependency graph of tasks.
///
/// Built once via [`DependencyGraph::build`], which rejects unknown upstream
/// references, self-edges, cycles and bad templates. There is no way to
/// mutate a built graph; configuration changes produce a new graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<TaskId, GraphNode>,
    /// Deterministic topological order (ties broken by task id).
    order: Vec<TaskId>,
}

impl DependencyGraph {
    /// Validate `tasks` and build the graph.
    pub fn build(tasks: impl IntoIterator<Item = Task>) -> Result<Self> {
        let mut nodes: BTreeMap<TaskId, GraphNode> = BTreeMap::new();

        for mut task in tasks {
            if nodes.contains_key(&task.id) {
                return Err(IngestError::ConfigError(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }

            let mut seen = HashSet::new();
            task.upstream.retain(|u| seen.insert(u.clone()));

            let template = Template::parse(&task.template).map_err(|message| {
                IngestError::Template {
                    task: task.id.clone(),
                    message,
                }
            })?;

            nodes.insert(
                task.id.clone(),
                GraphNode {
                    task,
                    template,
                    downstream: Vec::new(),
                },
            );
        }

        validate_edges(&nodes)?;
        ensure_acyclic(&nodes)?;

        // Populate dependents based on upstream lists.
        let edges: Vec<(TaskId, TaskId)> = nodes
            .values()
            .flat_map(|n| {
                n.task
                    .upstream
                    .iter()
                    .map(move |u| (u.clone(), n.task.id.clone()))
            })
            .collect();
        for (up, down) in edges {
            if let Some(node) = nodes.get_mut(&up) {
                node.downstream.push(down);
            }
        }
        for node in nodes.values_mut() {
            node.downstream.sort();
        }

        let order = lexical_topological_order(&nodes);
        debug!(?order, "dependency graph built");

        Ok(Self { nodes, order })
    }

    /// Build the graph from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let tasks = cfg
            .task
            .iter()
            .map(|(id, tc)| Task::from_config(id, tc, &cfg.default))
            .collect::<Result<Vec<_>>>()?;
        Self::build(tasks)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id).map(|n| &n.task)
    }

    pub fn template_of(&self, id: &str) -> Option<&Template> {
        self.nodes.get(id).map(|n| &n.template)
    }

    /// All tasks, in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| &n.task))
    }

    /// Deterministic topological order: among tasks with no remaining
    /// ordering constraint, the lexically smallest id comes first.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Position of `id` in [`Self::topological_order`].
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }

    /// Immediate upstream tasks.
    pub fn upstream_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.task.upstream.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate downstream tasks.
    pub fn downstream_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.downstream.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable downstream of `id`, in topological order.
    pub fn transitive_downstream_of(&self, id: &str) -> Vec<TaskId> {
        let mut stack: Vec<&str> = self.downstream_of(id).iter().map(String::as_str).collect();
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(name) = stack.pop() {
            if visited.insert(name) {
                stack.extend(self.downstream_of(name).iter().map(String::as_str));
            }
        }

        self.order
            .iter()
            .filter(|t| visited.contains(t.as_str()))
            .cloned()
            .collect()
    }

    /// Tasks without upstream dependencies, sorted by id.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.task.upstream.is_empty())
            .map(|n| n.task.id.as_str())
            .collect()
    }
}

fn validate_edges(nodes: &BTreeMap<TaskId, GraphNode>) -> Result<()> {
    for (name, node) in nodes.iter() {
        for up in node.task.upstream.iter() {
            if up == name {
                return Err(IngestError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `upstream`",
                    name
                )));
            }
            if !nodes.contains_key(up) {
                return Err(IngestError::UnknownUpstream {
                    task: name.clone(),
                    upstream: up.clone(),
                });
            }
        }
    }
    Ok(())
}

fn ensure_acyclic(nodes: &BTreeMap<TaskId, GraphNode>) -> Result<()> {
    // Edge direction: upstream -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }
    for (name, node) in nodes.iter() {
        for up in node.task.upstream.iter() {
            graph.add_edge(up.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(IngestError::Cycle {
            path: cycle_through(&graph, cycle.node_id()),
        }),
    }
}

/// Shortest cycle that starts and ends at `start`, e.g. `[a, b, a]`.
fn cycle_through<'a>(graph: &DiGraphMap<&'a str, ()>, start: &'a str) -> Vec<String> {
    let component: HashSet<&str> = tarjan_scc(graph)
        .into_iter()
        .find(|c| c.contains(&start))
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in graph.neighbors(node) {
            if !component.contains(next) {
                continue;
            }
            if next == start {
                let mut path = vec![start.to_string()];
                let mut cur = node;
                while cur != start {
                    path.push(cur.to_string());
                    match parent.get(cur) {
                        Some(p) => cur = *p,
                        None => break,
                    }
                }
                path.push(start.to_string());
                path.reverse();
                return path;
            }
            if parent.contains_key(next) {
                continue;
            }
            parent.insert(next, node);
            queue.push_back(next);
        }
    }

    vec![start.to_string()]
}

/// Kahn's algorithm with a sorted frontier.
fn lexical_topological_order(nodes: &BTreeMap<TaskId, GraphNode>) -> Vec<TaskId> {
    let mut remaining: HashMap<&str, usize> = nodes
        .values()
        .map(|n| (n.task.id.as_str(), n.task.upstream.len()))
        .collect();
    let mut frontier: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = frontier.pop_first() {
        order.push(id.to_string());
        let downstream = nodes.get(id).map(|n| n.downstream.as_slice()).unwrap_or(&[]);
        for down in downstream {
            if let Some(deg) = remaining.get_mut(down.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    frontier.insert(down.as_str());
                }
            }
        }
    }

    order
}
