//! Maximal independent set over symmetric graphs.
//!
//! The output indicator property marks every node matched or other-matched
//! such that no two matched nodes share an edge and every other-matched
//! node has a matched neighbour. The input graph must be symmetric; callers
//! are responsible for that precondition.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use arrow_array::types::UInt8Type;
use arrow_array::{ArrayRef, UInt8Array};

use crate::error::{Error, ErrorCode, Result};
use crate::graph::{Edge, GraphTopology, Node, PropertyGraph, TxnContext};
use crate::reduce::{Accumulator, ReduceLogicalOr};
use crate::runtime::{Bag, DoAllOptions, do_all};

use super::attach_node_column;

const CHUNK_SIZE: usize = 64;
const EDGE_TILE_SIZE: usize = 64;

// Serial and pull algorithms work in match flags.
const MATCHED: u8 = 0x01;
const OTHER_MATCHED: u8 = 0x00;
const UNMATCHED: u8 = 0xff;

// Priority algorithms pack a priority into the flag byte; the low bit tags
// undecided nodes and decided nodes collapse to the two sentinels below.
const PERMANENT_YES: u8 = 0xfe;
const PERMANENT_NO: u8 = 0x00;
const UNDECIDED: u8 = 0x01;
const TEMPORARY_YES: u8 = 0x02;

const HASH_SCALE: f32 = 1.0 / u32::MAX as f32;

/// Algorithm selectors for the independent set computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndependentSetAlgorithm {
    /// Greedy scan in node id order.
    Serial,
    /// Phased pull over lowest-id undecided neighbours.
    Pull,
    /// Priority-based rounds (the default).
    Priority,
    /// Priority rounds over edge tiles with a per-node tentative bit.
    EdgeTiledPriority,
}

/// A computational plan for the independent set computation.
#[derive(Clone, Copy, Debug)]
pub struct IndependentSetPlan {
    algorithm: IndependentSetAlgorithm,
}

impl IndependentSetPlan {
    /// Greedy serial algorithm.
    #[must_use]
    pub const fn serial() -> Self {
        Self {
            algorithm: IndependentSetAlgorithm::Serial,
        }
    }

    /// Phased pull algorithm.
    #[must_use]
    pub const fn pull() -> Self {
        Self {
            algorithm: IndependentSetAlgorithm::Pull,
        }
    }

    /// Priority algorithm.
    #[must_use]
    pub const fn priority() -> Self {
        Self {
            algorithm: IndependentSetAlgorithm::Priority,
        }
    }

    /// Edge-tiled priority algorithm.
    #[must_use]
    pub const fn edge_tiled_priority() -> Self {
        Self {
            algorithm: IndependentSetAlgorithm::EdgeTiledPriority,
        }
    }

    /// Builds a plan from an algorithm selector.
    #[must_use]
    pub const fn from_algorithm(algorithm: IndependentSetAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> IndependentSetAlgorithm {
        self.algorithm
    }
}

impl Default for IndependentSetPlan {
    fn default() -> Self {
        Self::priority()
    }
}

fn scramble(mut value: u32) -> u32 {
    value = ((value >> 16) ^ value).wrapping_mul(0x45d9_f3b);
    value = ((value >> 16) ^ value).wrapping_mul(0x45d9_f3b);
    (value >> 16) ^ value
}

/// Packs a node's fixed priority into a flag byte with `tag` in the low
/// bits. Higher bytes win matching rounds.
fn priority_flag(topology: &GraphTopology, node: Node, avg_degree: f32, scale_avg: f32, tag: u8) -> u8 {
    let degree = topology.out_degree(node) as f32;
    let x = degree - scramble(node) as f32 * HASH_SCALE;
    let res = (scale_avg / (avg_degree + x)).round() as i32;
    ((res + res) as u8) | tag
}

fn serial_algo(topology: &GraphTopology, flags: &[AtomicU8]) {
    for node in topology.nodes() {
        if flags[node as usize].load(Ordering::Relaxed) != UNMATCHED {
            continue;
        }
        let blocked = topology
            .out_dests(node)
            .iter()
            .any(|&dest| flags[dest as usize].load(Ordering::Relaxed) == MATCHED);
        if blocked {
            continue;
        }
        for &dest in topology.out_dests(node) {
            flags[dest as usize].store(OTHER_MATCHED, Ordering::Relaxed);
        }
        flags[node as usize].store(MATCHED, Ordering::Relaxed);
    }
}

fn pull_over(
    nodes: impl IntoIterator<Item = Node>,
    topology: &GraphTopology,
    flags: &[AtomicU8],
    matched: &Bag<Node>,
    other_matched: &Bag<Node>,
    next: &Bag<Node>,
    processed: &Accumulator<u64>,
) {
    let nodes: Vec<Node> = nodes.into_iter().collect();
    do_all(
        &nodes,
        |&src| {
            processed.update(1);
            if flags[src as usize].load(Ordering::Relaxed) == OTHER_MATCHED {
                return;
            }
            // Decide from lower-id neighbours only; higher ids defer to us.
            let mut flag = MATCHED;
            for &dest in topology.out_dests(src) {
                if dest >= src {
                    continue;
                }
                let dest_flag = flags[dest as usize].load(Ordering::Relaxed);
                if dest_flag == MATCHED {
                    flag = OTHER_MATCHED;
                    break;
                } else if dest_flag == UNMATCHED {
                    flag = UNMATCHED;
                }
            }
            if flag == UNMATCHED {
                next.push(src);
            } else if flag == MATCHED {
                matched.push(src);
            } else {
                other_matched.push(src);
            }
        },
        DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("independent-set-pull"),
    );
}

fn take(nodes: Vec<Node>, flags: &[AtomicU8], flag: u8) -> u64 {
    let taken = nodes.len() as u64;
    do_all(
        &nodes,
        |&node| flags[node as usize].store(flag, Ordering::Relaxed),
        DoAllOptions::new().chunk_size(CHUNK_SIZE).name("independent-set-take"),
    );
    taken
}

fn pull_algo(topology: &GraphTopology, flags: &[AtomicU8]) {
    let num_nodes = topology.num_nodes();
    let window = (num_nodes / 25).max(1);
    let mut remaining = num_nodes as u64;
    let mut cursor = 0usize;
    let mut current: Vec<Node> = Vec::new();
    let mut rounds = 0u64;

    while remaining > 0 {
        let processed = Accumulator::<u64>::new();
        let matched = Bag::new();
        let other_matched = Bag::new();
        let next = Bag::new();

        if !current.is_empty() {
            pull_over(
                current.iter().copied(),
                topology,
                flags,
                &matched,
                &other_matched,
                &next,
                &processed,
            );
        }
        let num_cur = processed.reduce() as usize;
        let fresh = (remaining.min(window as u64) as usize).saturating_sub(num_cur);
        let end = (cursor + fresh).min(num_nodes);
        if cursor < end {
            pull_over(
                (cursor as Node)..(end as Node),
                topology,
                flags,
                &matched,
                &other_matched,
                &next,
                &processed,
            );
        }
        cursor = end;

        let num_taken = take(matched.into_vec(), flags, MATCHED)
            + take(other_matched.into_vec(), flags, OTHER_MATCHED);
        debug_assert!(num_taken > 0 || cursor < num_nodes || !current.is_empty());

        current = next.into_vec();
        remaining = remaining.saturating_sub(num_taken);
        rounds += 1;
        if num_taken == 0 && current.is_empty() && cursor >= num_nodes {
            break;
        }
    }
    tracing::debug!(rounds, "independent set pull converged");
}

fn priority_algo(topology: &GraphTopology, flags: &[AtomicU8]) {
    // Truncating division: the node variant rounds the average degree down,
    // unlike the edge-tiled variant below.
    let avg_degree = (topology.num_edges() / topology.num_nodes()) as f32;
    let scale_avg = ((!1u8 / 2) - 1) as f32 * avg_degree;
    let mut rounds = 0u64;

    do_all(
        topology.nodes(),
        |src| {
            let flag = priority_flag(topology, src, avg_degree, scale_avg, UNDECIDED);
            flags[src as usize].store(flag, Ordering::Relaxed);
        },
        DoAllOptions::new().name("independent-set-init-prio"),
    );

    loop {
        let unmatched = ReduceLogicalOr::new();
        do_all(
            topology.nodes(),
            |src| {
                let src_flag = flags[src as usize].load(Ordering::Relaxed);
                if src_flag & UNDECIDED == 0 {
                    return;
                }
                for &dest in topology.out_dests(src) {
                    let dest_flag = flags[dest as usize].load(Ordering::Relaxed);
                    if dest_flag == PERMANENT_YES {
                        flags[src as usize].store(PERMANENT_NO, Ordering::Relaxed);
                        unmatched.update(true);
                        return;
                    }
                    if src_flag > dest_flag {
                        continue;
                    }
                    if src_flag == dest_flag {
                        match src.cmp(&dest) {
                            std::cmp::Ordering::Greater => continue,
                            std::cmp::Ordering::Equal => {
                                flags[src as usize].store(PERMANENT_NO, Ordering::Relaxed);
                                return;
                            }
                            std::cmp::Ordering::Less => {
                                unmatched.update(true);
                                return;
                            }
                        }
                    } else {
                        unmatched.update(true);
                        return;
                    }
                }
                flags[src as usize].store(PERMANENT_YES, Ordering::Relaxed);
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("independent-set-execute"),
        );
        rounds += 1;
        if !unmatched.reduce() {
            break;
        }
    }
    tracing::debug!(rounds, "independent set priority converged");
}

struct EdgeTile {
    src: Node,
    edges: Range<Edge>,
    tentative: AtomicBool,
}

fn edge_tiled_priority_algo(topology: &GraphTopology, flags: &[AtomicU8]) {
    let avg_degree = topology.num_edges() as f32 / topology.num_nodes() as f32;
    let scale_avg = ((!1u8 / 2) - 1) as f32 * avg_degree;
    let mut rounds = 0u64;

    let tile_bag = Bag::new();
    do_all(
        topology.nodes(),
        |src| {
            let flag =
                priority_flag(topology, src, avg_degree, scale_avg, UNDECIDED | TEMPORARY_YES);
            flags[src as usize].store(flag, Ordering::Relaxed);
            let range = topology.edges(src);
            let mut begin = range.start;
            while begin < range.end {
                let end = (begin + EDGE_TILE_SIZE as Edge).min(range.end);
                tile_bag.push(EdgeTile {
                    src,
                    edges: begin..end,
                    tentative: AtomicBool::new(false),
                });
                begin = end;
            }
        },
        DoAllOptions::new().steal().name("independent-set-init-prio"),
    );
    let tiles = tile_bag.into_vec();

    loop {
        let unmatched = ReduceLogicalOr::new();
        do_all(
            &tiles,
            |tile: &EdgeTile| {
                let src = tile.src;
                let src_flag = flags[src as usize].load(Ordering::Relaxed);
                if src_flag & UNDECIDED == 0 {
                    return;
                }
                for edge in tile.edges.clone() {
                    let dest = topology.edge_dest(edge);
                    let dest_flag = flags[dest as usize].load(Ordering::Relaxed);
                    if dest_flag == PERMANENT_YES {
                        flags[src as usize].store(PERMANENT_NO, Ordering::Relaxed);
                        return;
                    }
                    if src_flag > dest_flag {
                        continue;
                    }
                    if src_flag == dest_flag {
                        match src.cmp(&dest) {
                            std::cmp::Ordering::Greater => continue,
                            std::cmp::Ordering::Equal => {
                                flags[src as usize].store(PERMANENT_NO, Ordering::Relaxed);
                                tile.tentative.store(false, Ordering::Relaxed);
                                return;
                            }
                            std::cmp::Ordering::Less => {
                                tile.tentative.store(false, Ordering::Relaxed);
                                unmatched.update(true);
                                return;
                            }
                        }
                    } else {
                        tile.tentative.store(false, Ordering::Relaxed);
                        unmatched.update(true);
                        return;
                    }
                }
                tile.tentative.store(true, Ordering::Relaxed);
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("independent-set-execute"),
        );

        // Reduce the per-tile tentative bits onto each node.
        do_all(
            &tiles,
            |tile: &EdgeTile| {
                let src = tile.src as usize;
                if flags[src].load(Ordering::Relaxed) & UNDECIDED != 0
                    && !tile.tentative.load(Ordering::Relaxed)
                {
                    flags[src].fetch_and(!TEMPORARY_YES, Ordering::Relaxed);
                }
            },
            DoAllOptions::new().chunk_size(CHUNK_SIZE).name("independent-set-match-reduce"),
        );

        do_all(
            topology.nodes(),
            |src| {
                let src_flag = flags[src as usize].load(Ordering::Relaxed);
                if src_flag & UNDECIDED == 0 {
                    return;
                }
                if src_flag & TEMPORARY_YES != 0 {
                    flags[src as usize].store(PERMANENT_YES, Ordering::Relaxed);
                    for &dest in topology.out_dests(src) {
                        flags[dest as usize].store(PERMANENT_NO, Ordering::Relaxed);
                    }
                } else {
                    flags[src as usize]
                        .fetch_or(UNDECIDED | TEMPORARY_YES, Ordering::Relaxed);
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("independent-set-match-update"),
        );

        rounds += 1;
        if !unmatched.reduce() {
            break;
        }
    }
    tracing::debug!(rounds, "independent set edge-tiled priority converged");
}

/// Computes a maximal independent set and attaches the indicator as a
/// `UInt8` node property named `output_property_name`.
///
/// Serial and pull plans mark members with `0x01`; the priority plans mark
/// members with `0xfe`. Non-members are `0x00` in every plan.
pub fn independent_set(
    graph: &mut PropertyGraph,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: IndependentSetPlan,
) -> Result<()> {
    if graph.num_nodes() == 0 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("independent set needs a non-empty graph"));
    }

    let initial = match plan.algorithm() {
        IndependentSetAlgorithm::Serial | IndependentSetAlgorithm::Pull => UNMATCHED,
        _ => UNDECIDED,
    };
    let flags: Vec<AtomicU8> = (0..graph.num_nodes()).map(|_| AtomicU8::new(initial)).collect();

    match plan.algorithm() {
        IndependentSetAlgorithm::Serial => serial_algo(graph.topology(), &flags),
        IndependentSetAlgorithm::Pull => pull_algo(graph.topology(), &flags),
        IndependentSetAlgorithm::Priority => priority_algo(graph.topology(), &flags),
        IndependentSetAlgorithm::EdgeTiledPriority => {
            edge_tiled_priority_algo(graph.topology(), &flags);
        }
    }

    // Every node must have been decided; an undecided leftover is a logic
    // error in the round structure.
    let undecided = ReduceLogicalOr::new();
    let expected: &[u8] = match plan.algorithm() {
        IndependentSetAlgorithm::Serial | IndependentSetAlgorithm::Pull => {
            &[MATCHED, OTHER_MATCHED]
        }
        _ => &[PERMANENT_YES, PERMANENT_NO],
    };
    do_all(
        0..graph.num_nodes(),
        |node| {
            if !expected.contains(&flags[node].load(Ordering::Relaxed)) {
                undecided.update(true);
            }
        },
        DoAllOptions::new().steal().name("independent-set-verify-change"),
    );
    if undecided.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("a node was left undecided"));
    }

    let column: ArrayRef = Arc::new(UInt8Array::from_iter_values(
        flags.into_iter().map(AtomicU8::into_inner),
    ));
    attach_node_column(graph, txn, output_property_name, column)
}

/// Checks the independent set invariants: every indicator is a matched or
/// other-matched sentinel, and no two matched nodes share an edge.
pub fn independent_set_assert_valid(graph: &PropertyGraph, property_name: &str) -> Result<()> {
    let view = graph.node_pod_view::<UInt8Type>(property_name)?;
    let bad = ReduceLogicalOr::new();
    do_all(
        graph.nodes(),
        |node| {
            let flag = view.value(node as usize);
            if flag != MATCHED && flag != OTHER_MATCHED && flag != PERMANENT_YES {
                bad.update(true);
                return;
            }
            if flag == OTHER_MATCHED {
                return;
            }
            for edge in graph.edges(node) {
                let dest = graph.edge_dest(edge);
                if dest != node && view.value(dest as usize) != OTHER_MATCHED {
                    bad.update(true);
                }
            }
        },
        DoAllOptions::new().steal().name("independent-set-validate"),
    );
    if bad.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("two adjacent nodes are both in the set"));
    }
    Ok(())
}

/// Summary statistics over an independent set indicator property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndependentSetStatistics {
    /// The number of nodes in the set.
    pub cardinality: u32,
}

impl IndependentSetStatistics {
    /// Computes statistics over the named indicator property.
    pub fn compute(graph: &PropertyGraph, property_name: &str) -> Result<Self> {
        let view = graph.node_pod_view::<UInt8Type>(property_name)?;
        let members = Accumulator::<u32>::new();
        do_all(
            graph.nodes(),
            |node| {
                if view.value(node as usize) != 0 {
                    members.update(1);
                }
            },
            DoAllOptions::new().steal().name("independent-set-statistics"),
        );
        Ok(Self {
            cardinality: members.reduce(),
        })
    }
}

impl fmt::Display for IndependentSetStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cardinality = {}", self.cardinality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{make_clique, make_ferris_wheel, make_sawtooth};
    use rstest::rstest;

    #[rstest]
    #[case::serial(IndependentSetPlan::serial())]
    #[case::pull(IndependentSetPlan::pull())]
    #[case::priority(IndependentSetPlan::priority())]
    #[case::edge_tiled(IndependentSetPlan::edge_tiled_priority())]
    fn clique_admits_exactly_one_member(#[case] plan: IndependentSetPlan) {
        let mut graph = make_clique(4).expect("valid clique");
        let mut txn = TxnContext::new();
        independent_set(&mut graph, "is", &mut txn, plan).expect("independent set succeeds");
        independent_set_assert_valid(&graph, "is").expect("output is valid");
        let stats = IndependentSetStatistics::compute(&graph, "is").expect("statistics");
        assert_eq!(stats.cardinality, 1);
    }

    #[rstest]
    #[case::serial(IndependentSetPlan::serial())]
    #[case::pull(IndependentSetPlan::pull())]
    #[case::priority(IndependentSetPlan::priority())]
    #[case::edge_tiled(IndependentSetPlan::edge_tiled_priority())]
    fn wheel_output_is_maximal(#[case] plan: IndependentSetPlan) {
        let mut graph = make_ferris_wheel(9).expect("valid wheel");
        let mut txn = TxnContext::new();
        independent_set(&mut graph, "is", &mut txn, plan).expect("independent set succeeds");
        independent_set_assert_valid(&graph, "is").expect("output is valid");
        let stats = IndependentSetStatistics::compute(&graph, "is").expect("statistics");
        assert!(stats.cardinality >= 1);
    }

    #[test]
    fn priority_plan_marks_members_with_the_priority_sentinel() {
        let mut graph = make_sawtooth(4).expect("valid sawtooth");
        let mut txn = TxnContext::new();
        independent_set(&mut graph, "is", &mut txn, IndependentSetPlan::priority())
            .expect("independent set succeeds");
        let view = graph.node_pod_view::<UInt8Type>("is").expect("typed view");
        let members = graph
            .nodes()
            .filter(|&n| view.value(n as usize) == PERMANENT_YES)
            .count();
        assert!(members >= 1);
        assert!(graph
            .nodes()
            .all(|n| matches!(view.value(n as usize), PERMANENT_YES | PERMANENT_NO)));
    }

    #[test]
    fn empty_graph_is_rejected() {
        let builder = crate::graph::GraphTopologyBuilder::new();
        let mut graph =
            PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut txn = TxnContext::new();
        let err = independent_set(&mut graph, "is", &mut txn, IndependentSetPlan::default())
            .expect_err("empty graph");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
