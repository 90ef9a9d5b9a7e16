//! Breadth-first search.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arrow_array::{ArrayRef, UInt32Array, types::UInt32Type};

use crate::bitset::DynamicBitset;
use crate::error::{Error, ErrorCode, Result};
use crate::graph::{Edge, GraphTopology, Node, PropertyGraph, TransposedTopology, TxnContext};
use crate::reduce::{Accumulator, ReduceLogicalOr, ReduceMax};
use crate::runtime::{Bag, ChunkedFifo, DoAllOptions, do_all, for_each};

use super::attach_node_column;

/// Distance assigned to nodes unreachable from the source.
pub const BFS_DISTANCE_INFINITY: u32 = u32::MAX;

const CHUNK_SIZE: usize = 256;

/// Algorithm selectors for BFS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BfsAlgorithm {
    /// Asynchronous, work items are edge tiles.
    AsynchronousTile,
    /// Asynchronous, work items are nodes.
    Asynchronous,
    /// Level-synchronous, work items are edge tiles.
    SynchronousTile,
    /// Level-synchronous, work items are nodes.
    Synchronous,
    /// Level-synchronous with push/pull direction switching.
    SynchronousDirectOpt,
}

/// A computational plan for BFS: the algorithm variant plus its tuning
/// parameters.
#[derive(Clone, Copy, Debug)]
pub struct BfsPlan {
    algorithm: BfsAlgorithm,
    edge_tile_size: usize,
    alpha: u32,
    beta: u32,
}

impl BfsPlan {
    /// Default number of edges per tile.
    pub const DEFAULT_EDGE_TILE_SIZE: usize = 256;
    /// Default push-to-pull switching threshold divisor. Empirical.
    pub const DEFAULT_ALPHA: u32 = 15;
    /// Default pull-to-push switching threshold divisor. Empirical.
    pub const DEFAULT_BETA: u32 = 18;

    /// Asynchronous with edge tiles of `edge_tile_size`.
    #[must_use]
    pub const fn asynchronous_tile(edge_tile_size: usize) -> Self {
        Self {
            algorithm: BfsAlgorithm::AsynchronousTile,
            edge_tile_size,
            alpha: 0,
            beta: 0,
        }
    }

    /// Asynchronous at node granularity.
    #[must_use]
    pub const fn asynchronous() -> Self {
        Self {
            algorithm: BfsAlgorithm::Asynchronous,
            edge_tile_size: 0,
            alpha: 0,
            beta: 0,
        }
    }

    /// Level-synchronous with edge tiles of `edge_tile_size`.
    #[must_use]
    pub const fn synchronous_tile(edge_tile_size: usize) -> Self {
        Self {
            algorithm: BfsAlgorithm::SynchronousTile,
            edge_tile_size,
            alpha: 0,
            beta: 0,
        }
    }

    /// Level-synchronous at node granularity.
    #[must_use]
    pub const fn synchronous() -> Self {
        Self {
            algorithm: BfsAlgorithm::Synchronous,
            edge_tile_size: 0,
            alpha: 0,
            beta: 0,
        }
    }

    /// Direction-optimising with the given switching thresholds.
    #[must_use]
    pub const fn synchronous_direct_opt(alpha: u32, beta: u32) -> Self {
        Self {
            algorithm: BfsAlgorithm::SynchronousDirectOpt,
            edge_tile_size: 0,
            alpha,
            beta,
        }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> BfsAlgorithm {
        self.algorithm
    }

    /// Returns the edge tile size.
    #[must_use]
    pub const fn edge_tile_size(&self) -> usize {
        self.edge_tile_size
    }

    /// Returns the push-to-pull threshold divisor.
    #[must_use]
    pub const fn alpha(&self) -> u32 {
        self.alpha
    }

    /// Returns the pull-to-push threshold divisor.
    #[must_use]
    pub const fn beta(&self) -> u32 {
        self.beta
    }
}

impl Default for BfsPlan {
    fn default() -> Self {
        Self::synchronous_direct_opt(Self::DEFAULT_ALPHA, Self::DEFAULT_BETA)
    }
}

/// Lowers `dist[dst]` to `candidate` if that improves it.
fn try_lower(dist: &[AtomicU32], dst: Node, candidate: u32) -> bool {
    dist[dst as usize].fetch_min(candidate, Ordering::AcqRel) > candidate
}

struct UpdateRequest {
    node: Node,
    dist: u32,
}

struct SrcEdgeTile {
    node: Node,
    dist: u32,
    edges: Range<Edge>,
}

fn tiles_of(topology: &GraphTopology, node: Node, dist: u32, tile_size: usize) -> Vec<SrcEdgeTile> {
    let range = topology.edges(node);
    let mut tiles = Vec::new();
    let mut begin = range.start;
    while begin < range.end {
        let end = (begin + tile_size as Edge).min(range.end);
        tiles.push(SrcEdgeTile {
            node,
            dist,
            edges: begin..end,
        });
        begin = end;
    }
    tiles
}

fn async_algo(topology: &GraphTopology, dist: &[AtomicU32], source: Node) {
    let worklist = ChunkedFifo::new(CHUNK_SIZE);
    for_each(
        [UpdateRequest {
            node: source,
            dist: 0,
        }],
        &worklist,
        |item, ctx| {
            // Stale items no longer match the source's settled distance.
            if item.dist != dist[item.node as usize].load(Ordering::Acquire) {
                return;
            }
            let next = item.dist + 1;
            for edge in topology.edges(item.node) {
                let dst = topology.edge_dest(edge);
                if try_lower(dist, dst, next) {
                    ctx.push(UpdateRequest {
                        node: dst,
                        dist: next,
                    });
                }
            }
        },
    );
}

fn async_tile_algo(topology: &GraphTopology, dist: &[AtomicU32], source: Node, tile_size: usize) {
    let worklist = ChunkedFifo::new(CHUNK_SIZE);
    for_each(tiles_of(topology, source, 0, tile_size), &worklist, |item, ctx| {
        if item.dist != dist[item.node as usize].load(Ordering::Acquire) {
            return;
        }
        let next = item.dist + 1;
        for edge in item.edges.clone() {
            let dst = topology.edge_dest(edge);
            if try_lower(dist, dst, next) {
                for tile in tiles_of(topology, dst, next, tile_size) {
                    ctx.push(tile);
                }
            }
        }
    });
}

fn sync_algo(topology: &GraphTopology, dist: &[AtomicU32], source: Node) {
    let mut current = vec![source];
    let mut next_level = 0u32;
    while !current.is_empty() {
        next_level += 1;
        let next = Bag::new();
        do_all(
            &current,
            |&node| {
                for edge in topology.edges(node) {
                    let dst = topology.edge_dest(edge);
                    if dist[dst as usize]
                        .compare_exchange(
                            BFS_DISTANCE_INFINITY,
                            next_level,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        next.push(dst);
                    }
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-sync"),
        );
        current = next.into_vec();
    }
}

fn sync_tile_algo(topology: &GraphTopology, dist: &[AtomicU32], source: Node, tile_size: usize) {
    let mut current = tiles_of(topology, source, 0, tile_size);
    let mut next_level = 0u32;
    while !current.is_empty() {
        next_level += 1;
        let next = Bag::new();
        do_all(
            &current,
            |tile: &SrcEdgeTile| {
                for edge in tile.edges.clone() {
                    let dst = topology.edge_dest(edge);
                    if dist[dst as usize]
                        .compare_exchange(
                            BFS_DISTANCE_INFINITY,
                            next_level,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        for tile in tiles_of(topology, dst, next_level, tile_size) {
                            next.push(tile);
                        }
                    }
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-sync-tile"),
        );
        current = next.into_vec();
    }
}

fn collect_frontier(bits: &DynamicBitset, num_nodes: usize) -> Vec<Node> {
    let frontier = Bag::new();
    do_all(
        0..num_nodes as Node,
        |node| {
            if bits.test(node as usize) {
                frontier.push(node);
            }
        },
        DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-collect"),
    );
    frontier.into_vec()
}

/// Direction-optimising BFS: push rounds relax outgoing edges of the
/// frontier; when the frontier's out-degree sum grows past `|E| / alpha`
/// the traversal flips to pull rounds over incoming edges, flipping back
/// once the frontier shrinks below `|N| / beta`.
fn direct_opt_algo(
    topology: &GraphTopology,
    transposed: &TransposedTopology,
    dist: &[AtomicU32],
    source: Node,
    alpha: u32,
    beta: u32,
) {
    let num_nodes = topology.num_nodes();
    let num_edges = topology.num_edges() as u64;

    let mut frontier = vec![source];
    let mut frontier_bits = DynamicBitset::new(num_nodes);
    frontier_bits.set(source as usize);
    let mut level = 0u32;
    let mut push_mode = true;

    loop {
        level += 1;

        if push_mode {
            if frontier.is_empty() {
                break;
            }
            let frontier_degree = Accumulator::<u64>::new();
            do_all(
                &frontier,
                |&node| frontier_degree.update(topology.out_degree(node) as u64),
                DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-degree"),
            );
            if alpha > 0 && frontier_degree.reduce() > num_edges / u64::from(alpha) {
                push_mode = false;
            }
        }

        if push_mode {
            let next = Bag::new();
            let next_bits = DynamicBitset::new(num_nodes);
            do_all(
                &frontier,
                |&node| {
                    for edge in topology.edges(node) {
                        let dst = topology.edge_dest(edge);
                        if dist[dst as usize]
                            .compare_exchange(
                                BFS_DISTANCE_INFINITY,
                                level,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            next_bits.set(dst as usize);
                            next.push(dst);
                        }
                    }
                },
                DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-push"),
            );
            frontier = next.into_vec();
            frontier_bits = next_bits;
        } else {
            // Pull: every unvisited node scans its in-edges for a frontier
            // member.
            let next_bits = DynamicBitset::new(num_nodes);
            let added = Accumulator::<u64>::new();
            do_all(
                0..num_nodes as Node,
                |node| {
                    if dist[node as usize].load(Ordering::Acquire) != BFS_DISTANCE_INFINITY {
                        return;
                    }
                    for &src in transposed.in_sources(node) {
                        if frontier_bits.test(src as usize) {
                            dist[node as usize].store(level, Ordering::Release);
                            next_bits.set(node as usize);
                            added.update(1);
                            break;
                        }
                    }
                },
                DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("bfs-pull"),
            );
            let count = added.reduce();
            if count == 0 {
                break;
            }
            if beta > 0 && count < (num_nodes as u64) / u64::from(beta) {
                push_mode = true;
                frontier = collect_frontier(&next_bits, num_nodes);
            }
            frontier_bits = next_bits;
        }
    }
}

/// Computes per-node hop distance from `start_node` on an unweighted graph
/// and attaches it as a `UInt32` node property named
/// `output_property_name`. Unreachable nodes keep
/// [`BFS_DISTANCE_INFINITY`].
pub fn bfs(
    graph: &mut PropertyGraph,
    start_node: Node,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: BfsPlan,
) -> Result<()> {
    if (start_node as usize) >= graph.num_nodes() {
        return Err(Error::new(ErrorCode::InvalidArgument).with_context(format!(
            "start node {start_node} is out of range for {} nodes",
            graph.num_nodes()
        )));
    }

    let dist: Vec<AtomicU32> = (0..graph.num_nodes())
        .map(|_| AtomicU32::new(BFS_DISTANCE_INFINITY))
        .collect();
    dist[start_node as usize].store(0, Ordering::Release);

    let tile_size = if plan.edge_tile_size() > 0 {
        plan.edge_tile_size()
    } else {
        BfsPlan::DEFAULT_EDGE_TILE_SIZE
    };

    match plan.algorithm() {
        BfsAlgorithm::AsynchronousTile => async_tile_algo(graph.topology(), &dist, start_node, tile_size),
        BfsAlgorithm::Asynchronous => async_algo(graph.topology(), &dist, start_node),
        BfsAlgorithm::SynchronousTile => sync_tile_algo(graph.topology(), &dist, start_node, tile_size),
        BfsAlgorithm::Synchronous => sync_algo(graph.topology(), &dist, start_node),
        BfsAlgorithm::SynchronousDirectOpt => {
            let transposed = graph.transposed();
            direct_opt_algo(
                graph.topology(),
                transposed,
                &dist,
                start_node,
                plan.alpha(),
                plan.beta(),
            );
        }
    }

    let column: ArrayRef = Arc::new(UInt32Array::from_iter_values(
        dist.into_iter().map(AtomicU32::into_inner),
    ));
    attach_node_column(graph, txn, output_property_name, column)
}

/// Checks the BFS output invariants: exactly one node at distance zero (the
/// source), and every edge `(u, v)` with `dist(u)` finite satisfies
/// `dist(v) <= dist(u) + 1`.
pub fn bfs_assert_valid(
    graph: &PropertyGraph,
    start_node: Node,
    property_name: &str,
) -> Result<()> {
    let view = graph.node_pod_view::<UInt32Type>(property_name)?;
    if view.len() != graph.num_nodes() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("distance property length does not match node count"));
    }
    if view.value(start_node as usize) != 0 {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("source node does not have distance 0"));
    }

    let zeros = Accumulator::<u64>::new();
    do_all(
        graph.nodes(),
        |node| {
            if view.value(node as usize) == 0 {
                zeros.update(1);
            }
        },
        DoAllOptions::new().steal().name("bfs-validate-zeros"),
    );
    if zeros.reduce() != 1 {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("more than one node has distance 0"));
    }

    let not_consistent = ReduceLogicalOr::new();
    do_all(
        graph.nodes(),
        |node| {
            let du = view.value(node as usize);
            if du == BFS_DISTANCE_INFINITY {
                return;
            }
            for edge in graph.edges(node) {
                let dv = view.value(graph.edge_dest(edge) as usize);
                if dv > du.saturating_add(1) {
                    not_consistent.update(true);
                }
            }
        },
        DoAllOptions::new().steal().name("bfs-validate-edges"),
    );
    if not_consistent.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("an edge crosses more than one BFS level"));
    }
    Ok(())
}

/// Summary statistics over a BFS distance property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BfsStatistics {
    /// The node found at distance zero.
    pub source_node: Node,
    /// The largest finite distance.
    pub max_distance: u32,
    /// The sum of finite distances.
    pub total_distance: u64,
    /// The number of nodes reachable from the source.
    pub n_reached_nodes: u32,
}

impl BfsStatistics {
    /// Computes statistics over the named distance property.
    pub fn compute(graph: &PropertyGraph, property_name: &str) -> Result<Self> {
        let view = graph.node_pod_view::<UInt32Type>(property_name)?;
        let source = AtomicU32::new(0);
        let max_dist = ReduceMax::<u32>::new();
        let total = Accumulator::<u64>::new();
        let reached = Accumulator::<u32>::new();
        do_all(
            graph.nodes(),
            |node| {
                let distance = view.value(node as usize);
                if distance == 0 {
                    source.store(node, Ordering::Relaxed);
                }
                if distance != BFS_DISTANCE_INFINITY {
                    max_dist.update(distance);
                    total.update(u64::from(distance));
                    reached.update(1);
                }
            },
            DoAllOptions::new().steal().name("bfs-statistics"),
        );
        Ok(Self {
            source_node: source.load(Ordering::Relaxed),
            max_distance: max_dist.reduce(),
            total_distance: total.reduce(),
            n_reached_nodes: reached.reduce(),
        })
    }

    /// Returns the mean distance over reached nodes.
    #[must_use]
    pub fn average_distance(&self) -> f64 {
        if self.n_reached_nodes == 0 {
            return 0.0;
        }
        self.total_distance as f64 / f64::from(self.n_reached_nodes)
    }
}

impl fmt::Display for BfsStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source node = {}", self.source_node)?;
        writeln!(f, "Number of reached nodes = {}", self.n_reached_nodes)?;
        writeln!(f, "Maximum distance = {}", self.max_distance)?;
        writeln!(f, "Sum of distances = {}", self.total_distance)?;
        writeln!(f, "Average distance = {}", self.average_distance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SymmetricGraphTopologyBuilder, make_clique};
    use rstest::rstest;

    fn path3_graph() -> PropertyGraph {
        let mut builder = SymmetricGraphTopologyBuilder::new();
        builder.add_nodes(3);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        PropertyGraph::from_topology(builder.into_csr().expect("valid topology"))
    }

    fn distances(graph: &PropertyGraph, name: &str) -> Vec<u32> {
        let view = graph.node_pod_view::<UInt32Type>(name).expect("typed view");
        graph.nodes().map(|n| view.value(n as usize)).collect()
    }

    #[rstest]
    #[case::asynchronous(BfsPlan::asynchronous())]
    #[case::asynchronous_tile(BfsPlan::asynchronous_tile(2))]
    #[case::synchronous(BfsPlan::synchronous())]
    #[case::synchronous_tile(BfsPlan::synchronous_tile(2))]
    #[case::direct_opt(BfsPlan::default())]
    fn path_distances_are_hop_counts(#[case] plan: BfsPlan) {
        let mut graph = path3_graph();
        let mut txn = TxnContext::new();
        bfs(&mut graph, 0, "dist", &mut txn, plan).expect("bfs succeeds");
        assert_eq!(distances(&graph, "dist"), vec![0, 1, 2]);
        bfs_assert_valid(&graph, 0, "dist").expect("output is valid");
    }

    #[test]
    fn unreachable_nodes_keep_the_sentinel() {
        let mut builder = crate::graph::GraphTopologyBuilder::new();
        builder.add_nodes(3);
        builder.add_edge(0, 1);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut txn = TxnContext::new();
        bfs(&mut graph, 0, "dist", &mut txn, BfsPlan::asynchronous()).expect("bfs succeeds");
        assert_eq!(distances(&graph, "dist"), vec![0, 1, BFS_DISTANCE_INFINITY]);
    }

    #[test]
    fn out_of_range_source_is_rejected() {
        let mut graph = path3_graph();
        let mut txn = TxnContext::new();
        let err = bfs(&mut graph, 9, "dist", &mut txn, BfsPlan::default())
            .expect_err("source out of range");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn duplicate_output_name_is_rejected() {
        let mut graph = path3_graph();
        let mut txn = TxnContext::new();
        bfs(&mut graph, 0, "dist", &mut txn, BfsPlan::synchronous()).expect("first run");
        let err = bfs(&mut graph, 0, "dist", &mut txn, BfsPlan::synchronous())
            .expect_err("output name already bound");
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[test]
    fn direction_optimising_matches_sync_on_a_dense_graph() {
        let mut graph = make_clique(8).expect("valid clique");
        let mut txn = TxnContext::new();
        bfs(&mut graph, 3, "sync", &mut txn, BfsPlan::synchronous()).expect("sync run");
        // A large alpha drops the push threshold to zero, forcing a pull phase.
        bfs(&mut graph, 3, "dopt", &mut txn, BfsPlan::synchronous_direct_opt(100, 1))
            .expect("direction-optimised run");
        assert_eq!(distances(&graph, "sync"), distances(&graph, "dopt"));
    }

    #[test]
    fn statistics_summarise_the_traversal() {
        let mut graph = path3_graph();
        let mut txn = TxnContext::new();
        bfs(&mut graph, 0, "dist", &mut txn, BfsPlan::default()).expect("bfs succeeds");
        let stats = BfsStatistics::compute(&graph, "dist").expect("statistics");
        assert_eq!(stats.source_node, 0);
        assert_eq!(stats.n_reached_nodes, 3);
        assert_eq!(stats.max_distance, 2);
        assert_eq!(stats.total_distance, 3);
        assert!((stats.average_distance() - 1.0).abs() < f64::EPSILON);
    }
}
