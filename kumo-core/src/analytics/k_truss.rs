//! Bulk-synchronous k-truss peeling.
//!
//! The k-truss of a symmetric graph keeps every edge that participates in
//! at least `k - 2` triangles among the surviving edges. Peeling repeats
//! support counting and removal until a fixed point.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow_array::types::UInt8Type;
use arrow_array::{ArrayRef, UInt8Array};

use crate::error::{Error, ErrorCode, Result};
use crate::graph::{Edge, GraphTopology, Node, PropertyGraph, TxnContext};
use crate::reduce::{Accumulator, ReduceLogicalOr};
use crate::runtime::{DoAllOptions, do_all};

use super::attach_edge_column;

const CHUNK_SIZE: usize = 64;

/// Algorithm selectors for k-truss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KTrussAlgorithm {
    /// Bulk-synchronous peeling.
    Bsp,
}

/// A computational plan for k-truss.
#[derive(Clone, Copy, Debug)]
pub struct KTrussPlan {
    algorithm: KTrussAlgorithm,
}

impl KTrussPlan {
    /// Bulk-synchronous peeling.
    #[must_use]
    pub const fn bsp() -> Self {
        Self {
            algorithm: KTrussAlgorithm::Bsp,
        }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KTrussAlgorithm {
        self.algorithm
    }
}

impl Default for KTrussPlan {
    fn default() -> Self {
        Self::bsp()
    }
}

/// Sorts each node's edges by destination, keeping the original edge id of
/// every slot so results can be reported in the caller's edge order.
fn sorted_with_mapping(topology: &GraphTopology) -> Result<(GraphTopology, Vec<Edge>)> {
    let mut adj_indices = Vec::with_capacity(topology.num_nodes() + 1);
    adj_indices.push(0u64);
    let mut dests = Vec::with_capacity(topology.num_edges());
    let mut mapping = Vec::with_capacity(topology.num_edges());
    for node in topology.nodes() {
        let mut pairs: Vec<(Node, Edge)> = topology
            .edges(node)
            .map(|edge| (topology.edge_dest(edge), edge))
            .collect();
        pairs.sort_unstable();
        for (dest, original) in pairs {
            dests.push(dest);
            mapping.push(original);
        }
        adj_indices.push(dests.len() as u64);
    }
    Ok((GraphTopology::new(adj_indices, dests)?, mapping))
}

/// Counts surviving triangles through the edge `(u, v)`.
fn alive_support(
    topology: &GraphTopology,
    alive: &[AtomicBool],
    u: Node,
    v: Node,
) -> u64 {
    let u_range = topology.edges(u);
    let v_range = topology.edges(v);
    let u_dests = topology.out_dests(u);
    let v_dests = topology.out_dests(v);
    let mut i = 0usize;
    let mut j = 0usize;
    let mut support = 0u64;
    while i < u_dests.len() && j < v_dests.len() {
        match u_dests[i].cmp(&v_dests[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                let w = u_dests[i];
                if w != u
                    && w != v
                    && alive[(u_range.start as usize) + i].load(Ordering::Relaxed)
                    && alive[(v_range.start as usize) + j].load(Ordering::Relaxed)
                {
                    support += 1;
                }
                i += 1;
                j += 1;
            }
        }
    }
    support
}

/// Finds the sorted-slot index of the edge `(u, v)`, if alive-agnostic.
fn find_edge(topology: &GraphTopology, u: Node, v: Node) -> Option<usize> {
    let range = topology.edges(u);
    let dests = topology.out_dests(u);
    let offset = dests.partition_point(|&dest| dest < v);
    (offset < dests.len() && dests[offset] == v).then(|| range.start as usize + offset)
}

fn bsp_algo(topology: &GraphTopology, alive: &[AtomicBool], k: u32) {
    let threshold = u64::from(k - 2);
    let mut rounds = 0u64;
    loop {
        let changed = ReduceLogicalOr::new();
        do_all(
            topology.nodes(),
            |u| {
                let range = topology.edges(u);
                let dests = topology.out_dests(u);
                for (slot, &v) in dests.iter().enumerate() {
                    // Peel each undirected edge once, from its lower endpoint.
                    if v <= u {
                        continue;
                    }
                    let index = range.start as usize + slot;
                    if !alive[index].load(Ordering::Relaxed) {
                        continue;
                    }
                    if alive_support(topology, alive, u, v) < threshold {
                        alive[index].store(false, Ordering::Relaxed);
                        if let Some(twin) = find_edge(topology, v, u) {
                            alive[twin].store(false, Ordering::Relaxed);
                        }
                        changed.update(true);
                    }
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("k-truss-peel"),
        );
        rounds += 1;
        if !changed.reduce() {
            break;
        }
    }
    tracing::debug!(rounds, "k-truss peeling converged");
}

/// Computes the k-truss of a symmetric graph and attaches a `UInt8` edge
/// property named `output_property_name`, 1 for edges in the truss and 0
/// for peeled edges.
pub fn k_truss(
    graph: &mut PropertyGraph,
    k: u32,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: KTrussPlan,
) -> Result<()> {
    if k < 2 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context(format!("k-truss needs k >= 2, got {k}")));
    }

    let (sorted, mapping) = sorted_with_mapping(graph.topology())?;
    let alive: Vec<AtomicBool> = (0..sorted.num_edges()).map(|_| AtomicBool::new(true)).collect();

    match plan.algorithm() {
        KTrussAlgorithm::Bsp => bsp_algo(&sorted, &alive, k),
    }

    let mut survivors = vec![0u8; graph.num_edges()];
    for (slot, flag) in alive.iter().enumerate() {
        if flag.load(Ordering::Relaxed) {
            survivors[mapping[slot] as usize] = 1;
        }
    }
    let column: ArrayRef = Arc::new(UInt8Array::from(survivors));
    attach_edge_column(graph, txn, output_property_name, column)
}

/// Checks the truss invariants: surviving edges are mirrored and each one
/// closes at least `k - 2` surviving triangles.
pub fn k_truss_assert_valid(graph: &PropertyGraph, k: u32, property_name: &str) -> Result<()> {
    if k < 2 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context(format!("k-truss needs k >= 2, got {k}")));
    }
    let view = graph.edge_pod_view::<UInt8Type>(property_name)?;

    let (sorted, mapping) = sorted_with_mapping(graph.topology())?;
    let alive: Vec<AtomicBool> = mapping
        .iter()
        .map(|&original| AtomicBool::new(view.value(original as usize) != 0))
        .collect();

    let threshold = u64::from(k - 2);
    let bad = ReduceLogicalOr::new();
    do_all(
        sorted.nodes(),
        |u| {
            let range = sorted.edges(u);
            let dests = sorted.out_dests(u);
            for (slot, &v) in dests.iter().enumerate() {
                let index = range.start as usize + slot;
                if !alive[index].load(Ordering::Relaxed) {
                    continue;
                }
                let mirrored = find_edge(&sorted, v, u)
                    .is_some_and(|twin| alive[twin].load(Ordering::Relaxed));
                if !mirrored || alive_support(&sorted, &alive, u, v) < threshold {
                    bad.update(true);
                }
            }
        },
        DoAllOptions::new().steal().name("k-truss-validate"),
    );
    if bad.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("a surviving edge is unsupported or unmirrored"));
    }
    Ok(())
}

/// Summary statistics over a k-truss edge property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KTrussStatistics {
    /// Directed edges remaining in the truss.
    pub number_of_edges_left: u64,
}

impl KTrussStatistics {
    /// Computes statistics over the named truss property.
    pub fn compute(graph: &PropertyGraph, property_name: &str) -> Result<Self> {
        let view = graph.edge_pod_view::<UInt8Type>(property_name)?;
        let survivors = Accumulator::<u64>::new();
        do_all(
            0..graph.num_edges(),
            |edge| {
                if view.value(edge) != 0 {
                    survivors.update(1);
                }
            },
            DoAllOptions::new().steal().name("k-truss-statistics"),
        );
        Ok(Self {
            number_of_edges_left: survivors.reduce(),
        })
    }
}

impl fmt::Display for KTrussStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of edges left = {}", self.number_of_edges_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SymmetricGraphTopologyBuilder, make_clique};
    use rstest::rstest;

    #[rstest]
    #[case::whole_graph(3, 12)]
    #[case::still_a_truss(4, 12)]
    #[case::too_demanding(5, 0)]
    fn clique_trusses(#[case] k: u32, #[case] edges_left: u64) {
        let mut graph = make_clique(4).expect("valid clique");
        let mut txn = TxnContext::new();
        k_truss(&mut graph, k, "truss", &mut txn, KTrussPlan::default())
            .expect("k-truss succeeds");
        k_truss_assert_valid(&graph, k, "truss").expect("output is valid");
        let stats = KTrussStatistics::compute(&graph, "truss").expect("statistics");
        assert_eq!(stats.number_of_edges_left, edges_left);
    }

    #[test]
    fn dangling_edge_is_peeled() {
        let mut builder = SymmetricGraphTopologyBuilder::new();
        builder.add_nodes(4);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        builder.add_edge(0, 2);
        builder.add_edge(2, 3);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut txn = TxnContext::new();
        k_truss(&mut graph, 3, "truss", &mut txn, KTrussPlan::default())
            .expect("k-truss succeeds");
        let stats = KTrussStatistics::compute(&graph, "truss").expect("statistics");
        assert_eq!(stats.number_of_edges_left, 6);
        k_truss_assert_valid(&graph, 3, "truss").expect("output is valid");
    }

    #[test]
    fn k_below_two_is_rejected() {
        let mut graph = make_clique(3).expect("valid clique");
        let mut txn = TxnContext::new();
        let err = k_truss(&mut graph, 1, "truss", &mut txn, KTrussPlan::default())
            .expect_err("k too small");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
