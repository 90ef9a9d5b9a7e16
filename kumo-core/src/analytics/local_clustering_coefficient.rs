//! Local clustering coefficient via ordered triangle counting.
//!
//! Both variants assume a symmetric graph and require every node's edge
//! list sorted by destination; the entry point sorts a scratch copy of the
//! topology, so the caller's graph is never mutated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arrow_array::types::Float64Type;
use arrow_array::{ArrayRef, Float64Array};

use crate::error::{Error, ErrorCode, Result};
use crate::graph::{GraphTopology, Node, PropertyGraph, TxnContext};
use crate::reduce::ReduceLogicalOr;
use crate::runtime::{DoAllOptions, PerThreadStorage, do_all};

use super::{attach_node_column, is_approximate_degree_distribution_power_law};

const CHUNK_SIZE: usize = 64;

/// Algorithm selectors for the clustering coefficient computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalClusteringCoefficientAlgorithm {
    /// One shared counter per node, updated atomically.
    OrderedCountAtomics,
    /// One counter slab per worker, reduced after the counting pass.
    OrderedCountPerThread,
}

/// Node relabeling policy applied before counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relabeling {
    /// Keep node ids as they are.
    NoRelabel,
    /// Relabel nodes by decreasing degree.
    Relabel,
    /// Relabel when the degree distribution looks power-law.
    AutoRelabel,
}

/// A computational plan for the clustering coefficient computation.
#[derive(Clone, Copy, Debug)]
pub struct LocalClusteringCoefficientPlan {
    algorithm: LocalClusteringCoefficientAlgorithm,
    relabeling: Relabeling,
    edges_sorted: bool,
}

impl LocalClusteringCoefficientPlan {
    /// Atomic counting with the given relabeling policy.
    #[must_use]
    pub const fn ordered_count_atomics(relabeling: Relabeling, edges_sorted: bool) -> Self {
        Self {
            algorithm: LocalClusteringCoefficientAlgorithm::OrderedCountAtomics,
            relabeling,
            edges_sorted,
        }
    }

    /// Per-worker counting with the given relabeling policy.
    #[must_use]
    pub const fn ordered_count_per_thread(relabeling: Relabeling, edges_sorted: bool) -> Self {
        Self {
            algorithm: LocalClusteringCoefficientAlgorithm::OrderedCountPerThread,
            relabeling,
            edges_sorted,
        }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> LocalClusteringCoefficientAlgorithm {
        self.algorithm
    }

    /// Returns the relabeling policy.
    #[must_use]
    pub const fn relabeling(&self) -> Relabeling {
        self.relabeling
    }

    /// Returns whether the caller asserts the input edges are already
    /// sorted by destination.
    #[must_use]
    pub const fn edges_sorted(&self) -> bool {
        self.edges_sorted
    }
}

impl Default for LocalClusteringCoefficientPlan {
    fn default() -> Self {
        Self::ordered_count_atomics(Relabeling::AutoRelabel, false)
    }
}

/// Counts triangles incident to `node` by marching `node`'s sorted edge
/// list against each lower neighbour's sorted edge list.
fn ordered_count(topology: &GraphTopology, node: Node, mut bump: impl FnMut(Node)) {
    let dests_n = topology.out_dests(node);
    for &v in dests_n {
        if v > node {
            break;
        }
        let mut cursor = 0usize;
        for &w in topology.out_dests(v) {
            if w > v {
                break;
            }
            while cursor < dests_n.len() && dests_n[cursor] < w {
                cursor += 1;
            }
            if cursor < dests_n.len() && dests_n[cursor] == w {
                bump(node);
                bump(v);
                bump(w);
            }
        }
    }
}

fn count_atomics(topology: &GraphTopology) -> Vec<u32> {
    let counts: Vec<AtomicU32> = (0..topology.num_nodes()).map(|_| AtomicU32::new(0)).collect();
    do_all(
        topology.nodes(),
        |node| {
            ordered_count(topology, node, |member| {
                counts[member as usize].fetch_add(1, Ordering::Relaxed);
            });
        },
        DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("triangle-count"),
    );
    counts.into_iter().map(AtomicU32::into_inner).collect()
}

fn count_per_thread(topology: &GraphTopology) -> Vec<u32> {
    let num_nodes = topology.num_nodes();
    let mut slabs = PerThreadStorage::from_fn(|| vec![0u32; num_nodes]);
    do_all(
        topology.nodes(),
        |node| {
            slabs.with_local(|slab| {
                ordered_count(topology, node, |member| {
                    slab[member as usize] += 1;
                });
            });
        },
        DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("triangle-count"),
    );

    let slabs = slabs.drain_with(Vec::new);
    let totals: Vec<AtomicU32> = (0..num_nodes).map(|_| AtomicU32::new(0)).collect();
    do_all(
        topology.nodes(),
        |node| {
            let sum: u32 = slabs.iter().map(|slab| slab[node as usize]).sum();
            totals[node as usize].store(sum, Ordering::Relaxed);
        },
        DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("triangle-reduce"),
    );
    totals.into_iter().map(AtomicU32::into_inner).collect()
}

/// Computes each node's local clustering coefficient
/// `2 T(v) / (d (d - 1))` and attaches it as a `Float64` node property
/// named `output_property_name`. Nodes of degree at most one get 0.
pub fn local_clustering_coefficient(
    graph: &mut PropertyGraph,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: LocalClusteringCoefficientPlan,
) -> Result<()> {
    let relabel = match plan.relabeling() {
        Relabeling::NoRelabel => false,
        Relabeling::Relabel => true,
        Relabeling::AutoRelabel => is_approximate_degree_distribution_power_law(graph),
    };

    // Build the scratch topology the counting pass runs on. Relabeling
    // breaks any pre-existing sort, so it always re-sorts.
    let mut perm: Option<Vec<Node>> = None;
    let owned: Option<GraphTopology> = if relabel {
        let (mut relabeled, mapping) = graph.topology().relabel_by_decreasing_degree();
        relabeled.sort_edges_by_dest();
        perm = Some(mapping);
        Some(relabeled)
    } else if plan.edges_sorted() && graph.topology().is_sorted_by_dest() {
        None
    } else {
        let mut copy = graph.topology().clone();
        copy.sort_edges_by_dest();
        Some(copy)
    };
    let topology = owned.as_ref().unwrap_or_else(|| graph.topology());

    let counts = match plan.algorithm() {
        LocalClusteringCoefficientAlgorithm::OrderedCountAtomics => count_atomics(topology),
        LocalClusteringCoefficientAlgorithm::OrderedCountPerThread => count_per_thread(topology),
    };

    let coefficients: Vec<f64> = (0..graph.num_nodes() as Node)
        .map(|original| {
            let scratch_id = perm.as_ref().map_or(original, |perm| perm[original as usize]);
            let degree = topology.out_degree(scratch_id);
            if degree > 1 {
                f64::from(2 * counts[scratch_id as usize]) / (degree * (degree - 1)) as f64
            } else {
                0.0
            }
        })
        .collect();

    let column: ArrayRef = Arc::new(Float64Array::from(coefficients));
    attach_node_column(graph, txn, output_property_name, column)
}

/// Checks the clustering coefficient invariants: every value lies in
/// `[0, 1]` and nodes of degree at most one have coefficient zero.
pub fn local_clustering_coefficient_assert_valid(
    graph: &PropertyGraph,
    property_name: &str,
) -> Result<()> {
    let view = graph.node_pod_view::<Float64Type>(property_name)?;
    let bad = ReduceLogicalOr::new();
    do_all(
        graph.nodes(),
        |node| {
            let coefficient = view.value(node as usize);
            if !(0.0..=1.0).contains(&coefficient) {
                bad.update(true);
            }
            if graph.out_degree(node) <= 1 && coefficient != 0.0 {
                bad.update(true);
            }
        },
        DoAllOptions::new().steal().name("lcc-validate"),
    );
    if bad.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("a clustering coefficient is out of range"));
    }
    Ok(())
}
