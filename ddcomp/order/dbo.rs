//! Degree-based ordering.
//!
//! Variables are nodes of an interaction graph; every edge is oriented from
//! the endpoint of lower degree to the endpoint of higher degree and the
//! topological order of the resulting DAG is the variable order.
use std::collections::VecDeque;

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex, UnGraph},
    visit::EdgeRef,
};
use rustc_hash::FxHashSet;
use tracing::{debug, instrument};

use crate::{
    cnf::Cnf,
    options::{DboGraph, Options},
    order::{to_variable, Orderer, VariableOrder},
    Error, Result,
};

pub struct Dbo {
    graph: DboGraph,
    clause_reordering: bool,
}

impl Dbo {
    #[must_use]
    pub fn new(options: &Options) -> Dbo {
        Dbo {
            graph: options.dbo_graph,
            clause_reordering: options.dbo_clause_reordering,
        }
    }
}

/// Interaction graph with node `i` standing for variable `i + 1`.
#[must_use]
pub fn interaction_graph(cnf: &Cnf, shape: DboGraph) -> UnGraph<(), ()> {
    let mut graph = UnGraph::with_capacity(cnf.variable_count(), 0);
    for _ in 0..cnf.variable_count() {
        graph.add_node(());
    }

    let mut edges: FxHashSet<(usize, usize)> = FxHashSet::default();
    let mut connect = |graph: &mut UnGraph<(), ()>, a: u32, b: u32| {
        let (a, b) = (a.min(b) as usize - 1, a.max(b) as usize - 1);
        if a != b && edges.insert((a, b)) {
            graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), ());
        }
    };

    for clause in cnf.clauses() {
        let variables: Vec<u32> = clause.variables().collect();
        match shape {
            DboGraph::Clique => {
                for (idx, &a) in variables.iter().enumerate() {
                    for &b in &variables[idx + 1..] {
                        connect(&mut graph, a, b);
                    }
                }
            }
            DboGraph::Star => {
                if let Some(&hub) = variables.iter().min() {
                    for &other in &variables {
                        connect(&mut graph, hub, other);
                    }
                }
            }
        }
    }

    graph
}

/// Clause graph: clauses are adjacent when they share a variable.
fn clause_graph(cnf: &Cnf) -> UnGraph<(), ()> {
    let mut occurrences: Vec<Vec<usize>> = vec![Vec::new(); cnf.variable_count() + 1];
    for (idx, clause) in cnf.clauses().iter().enumerate() {
        for variable in clause.variables() {
            occurrences[variable as usize].push(idx);
        }
    }

    let mut graph = UnGraph::with_capacity(cnf.clauses().len(), 0);
    for _ in cnf.clauses() {
        graph.add_node(());
    }

    let mut edges: FxHashSet<(usize, usize)> = FxHashSet::default();
    for clauses in &occurrences {
        for (idx, &a) in clauses.iter().enumerate() {
            for &b in &clauses[idx + 1..] {
                if edges.insert((a, b)) {
                    graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), ());
                }
            }
        }
    }

    graph
}

/// Orient every edge of `graph` from lower to higher `(degree, index)`.
///
/// Edges are visited breadth-first from the highest-degree node, restarting at
/// the highest-degree unvisited node for every further component.
#[must_use]
pub fn orient(graph: &UnGraph<(), ()>) -> DiGraph<(), ()> {
    let degree: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.neighbors(node).count())
        .collect();
    let rank = |node: NodeIndex| (degree[node.index()], node.index());

    let mut by_degree: Vec<NodeIndex> = graph.node_indices().collect();
    by_degree.sort_by_key(|&node| std::cmp::Reverse(rank(node)));

    let mut dag = DiGraph::with_capacity(graph.node_count(), graph.edge_count());
    for _ in graph.node_indices() {
        dag.add_node(());
    }

    let mut visited = vec![false; graph.node_count()];
    let mut oriented = vec![false; graph.edge_count()];
    let mut queue = VecDeque::new();

    for start in by_degree {
        if visited[start.index()] {
            continue;
        }
        visited[start.index()] = true;
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            for edge in graph.edges(node) {
                let other = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };

                if !oriented[edge.id().index()] {
                    oriented[edge.id().index()] = true;
                    let (from, to) = if rank(node) < rank(other) {
                        (node, other)
                    } else {
                        (other, node)
                    };
                    dag.add_edge(from, to, ());
                }

                if !visited[other.index()] {
                    visited[other.index()] = true;
                    queue.push_back(other);
                }
            }
        }
    }

    dag
}

/// Node indices in topological order.
pub fn topological(dag: &DiGraph<(), ()>) -> Result<Vec<usize>> {
    toposort(dag, None)
        .map(|nodes| nodes.into_iter().map(NodeIndex::index).collect())
        .map_err(|cycle| Error::OrientationCycle {
            node: cycle.node_id().index(),
        })
}

impl Orderer for Dbo {
    fn name(&self) -> &'static str {
        "dbo"
    }

    /// Clique orders keep the plain `dbo` key; star orders are `dbo-star`.
    fn stage(&self) -> String {
        match self.graph {
            DboGraph::Clique => self.name().to_owned(),
            DboGraph::Star => format!("{}-{}", self.name(), self.graph.stub()),
        }
    }

    #[instrument(skip_all, fields(graph = self.graph.stub(), variables = cnf.variable_count()))]
    fn order(&self, cnf: &Cnf, _seed: Option<&VariableOrder>) -> Result<VariableOrder> {
        let graph = interaction_graph(cnf, self.graph);
        debug!(edges = graph.edge_count(), "built interaction graph");

        let sorted = topological(&orient(&graph))?;
        VariableOrder::new(sorted.into_iter().map(|idx| to_variable(idx + 1)).collect())
    }

    fn reorders_clauses(&self) -> bool {
        self.clause_reordering
    }

    #[instrument(skip_all, fields(clauses = cnf.clauses().len()))]
    fn reorder_clauses(&self, cnf: &mut Cnf, _order: &VariableOrder) -> Result<()> {
        if !self.clause_reordering {
            return Ok(());
        }

        let permutation = topological(&orient(&clause_graph(cnf)))?;
        cnf.reorder_clauses(&permutation);
        Ok(())
    }
}
