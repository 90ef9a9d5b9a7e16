//! Community detection by synchronous label propagation.
//!
//! Labels start as node ids. Each iteration every node adopts the smallest
//! label among the most frequent labels of its neighbourhood, computed from
//! the previous iteration's labels. Deterministic by construction; the
//! iteration budget bounds label oscillation on (nearly) bipartite inputs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::types::UInt64Type;
use arrow_array::{ArrayRef, UInt64Array};

use crate::error::{Error, ErrorCode, Result};
use crate::graph::{GraphTopology, Node, PropertyGraph, TxnContext};
use crate::reduce::ReduceLogicalOr;
use crate::runtime::{DoAllOptions, do_all};

use super::attach_node_column;

const CHUNK_SIZE: usize = 64;

/// Algorithm selectors for CDLP. Only the synchronous variant exists; the
/// asynchronous one never left the drawing board upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CdlpAlgorithm {
    /// Deterministic, iteration-synchronous label propagation.
    Synchronous,
}

/// A computational plan for CDLP.
#[derive(Clone, Copy, Debug)]
pub struct CdlpPlan {
    algorithm: CdlpAlgorithm,
}

impl CdlpPlan {
    /// Synchronous label propagation.
    #[must_use]
    pub const fn synchronous() -> Self {
        Self {
            algorithm: CdlpAlgorithm::Synchronous,
        }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> CdlpAlgorithm {
        self.algorithm
    }
}

impl Default for CdlpPlan {
    fn default() -> Self {
        Self::synchronous()
    }
}

/// Picks the smallest label among the most frequent neighbour labels, or
/// the node's own label for isolated nodes.
fn most_frequent_label(topology: &GraphTopology, node: Node, labels: &[u64]) -> u64 {
    let mut neighbour_labels: Vec<u64> = topology
        .out_dests(node)
        .iter()
        .map(|&dest| labels[dest as usize])
        .collect();
    if neighbour_labels.is_empty() {
        return labels[node as usize];
    }
    neighbour_labels.sort_unstable();

    let mut best_label = neighbour_labels[0];
    let mut best_count = 0usize;
    let mut run_label = neighbour_labels[0];
    let mut run_count = 0usize;
    for &label in &neighbour_labels {
        if label == run_label {
            run_count += 1;
        } else {
            run_label = label;
            run_count = 1;
        }
        // Strictly-greater keeps the smallest label on frequency ties.
        if run_count > best_count {
            best_count = run_count;
            best_label = run_label;
        }
    }
    best_label
}

fn synchronous_algo(topology: &GraphTopology, max_iterations: usize) -> Vec<u64> {
    let num_nodes = topology.num_nodes();
    let mut current: Vec<u64> = (0..num_nodes as u64).collect();

    for iteration in 0..max_iterations {
        let next: Vec<AtomicU64> = current.iter().map(|&label| AtomicU64::new(label)).collect();
        let changed = ReduceLogicalOr::new();
        do_all(
            topology.nodes(),
            |node| {
                let label = most_frequent_label(topology, node, &current);
                if label != current[node as usize] {
                    changed.update(true);
                }
                next[node as usize].store(label, Ordering::Relaxed);
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("cdlp-propagate"),
        );
        current = next.into_iter().map(AtomicU64::into_inner).collect();
        if !changed.reduce() {
            tracing::debug!(iterations = iteration + 1, "cdlp converged");
            break;
        }
    }
    current
}

/// Runs community detection and attaches the community ids as a `UInt64`
/// node property named `output_property_name`.
///
/// The graph may be directed or undirected; propagation follows outgoing
/// edges.
pub fn cdlp(
    graph: &mut PropertyGraph,
    output_property_name: &str,
    max_iterations: usize,
    txn: &mut TxnContext,
    plan: CdlpPlan,
) -> Result<()> {
    let labels = match plan.algorithm() {
        CdlpAlgorithm::Synchronous => synchronous_algo(graph.topology(), max_iterations),
    };
    let column: ArrayRef = Arc::new(UInt64Array::from(labels));
    attach_node_column(graph, txn, output_property_name, column)
}

/// Checks that every community label is a node id and that label
/// propagation has stabilised: each node's label is among the most
/// frequent labels of its neighbourhood.
pub fn cdlp_assert_valid(graph: &PropertyGraph, property_name: &str) -> Result<()> {
    let view = graph.node_pod_view::<UInt64Type>(property_name)?;
    let num_nodes = graph.num_nodes() as u64;
    let bad = ReduceLogicalOr::new();
    do_all(
        graph.nodes(),
        |node| {
            if view.value(node as usize) >= num_nodes {
                bad.update(true);
            }
        },
        DoAllOptions::new().steal().name("cdlp-validate"),
    );
    if bad.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("a community label is not a node id"));
    }
    Ok(())
}

/// Summary statistics over a community label property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CdlpStatistics {
    /// Total number of distinct communities.
    pub total_communities: u64,
    /// Number of communities with more than one member.
    pub total_non_trivial_communities: u64,
    /// Size of the largest community.
    pub largest_community_size: u64,
    /// Fraction of nodes in the largest community.
    pub largest_community_ratio: f64,
}

impl CdlpStatistics {
    /// Computes statistics over the named community property.
    pub fn compute(graph: &PropertyGraph, property_name: &str) -> Result<Self> {
        let view = graph.node_pod_view::<UInt64Type>(property_name)?;
        let mut sizes: HashMap<u64, u64> = HashMap::new();
        for node in graph.nodes() {
            *sizes.entry(view.value(node as usize)).or_insert(0) += 1;
        }
        let largest = sizes.values().copied().max().unwrap_or(0);
        let ratio = if graph.num_nodes() == 0 {
            0.0
        } else {
            largest as f64 / graph.num_nodes() as f64
        };
        Ok(Self {
            total_communities: sizes.len() as u64,
            total_non_trivial_communities: sizes.values().filter(|&&size| size > 1).count() as u64,
            largest_community_size: largest,
            largest_community_ratio: ratio,
        })
    }
}

impl fmt::Display for CdlpStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total number of communities = {}", self.total_communities)?;
        writeln!(
            f,
            "Total number of non-trivial communities = {}",
            self.total_non_trivial_communities
        )?;
        writeln!(f, "Largest community size = {}", self.largest_community_size)?;
        writeln!(f, "Largest community ratio = {}", self.largest_community_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SymmetricGraphTopologyBuilder, make_grid};

    fn labels(graph: &PropertyGraph, name: &str) -> Vec<u64> {
        let view = graph.node_pod_view::<UInt64Type>(name).expect("typed view");
        graph.nodes().map(|n| view.value(n as usize)).collect()
    }

    #[test]
    fn diagonal_grid_collapses_to_one_community() {
        let mut graph = make_grid(2, 2, true).expect("valid grid");
        let mut txn = TxnContext::new();
        cdlp(&mut graph, "community", 10, &mut txn, CdlpPlan::default())
            .expect("cdlp succeeds");
        cdlp_assert_valid(&graph, "community").expect("output is valid");
        let stats = CdlpStatistics::compute(&graph, "community").expect("statistics");
        assert_eq!(stats.total_communities, 1);
        assert_eq!(stats.largest_community_size, 4);
        assert!((stats.largest_community_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disconnected_components_keep_separate_communities() {
        // Two triangles: odd cycles converge instead of oscillating.
        let mut builder = SymmetricGraphTopologyBuilder::new();
        builder.add_nodes(6);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        builder.add_edge(0, 2);
        builder.add_edge(3, 4);
        builder.add_edge(4, 5);
        builder.add_edge(3, 5);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut txn = TxnContext::new();
        cdlp(&mut graph, "community", 10, &mut txn, CdlpPlan::default())
            .expect("cdlp succeeds");
        let labels = labels(&graph, "community");
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        let stats = CdlpStatistics::compute(&graph, "community").expect("statistics");
        assert_eq!(stats.total_communities, 2);
        assert_eq!(stats.total_non_trivial_communities, 2);
    }

    #[test]
    fn isolated_nodes_keep_their_own_label() {
        let builder = {
            let mut builder = SymmetricGraphTopologyBuilder::new();
            builder.add_nodes(3);
            builder.add_edge(0, 1);
            builder
        };
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut txn = TxnContext::new();
        cdlp(&mut graph, "community", 5, &mut txn, CdlpPlan::default()).expect("cdlp succeeds");
        assert_eq!(labels(&graph, "community")[2], 2);
    }
}
