//! Single-source shortest paths over non-negative edge weights.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::types::{
    ArrowPrimitiveType, Float32Type, Float64Type, Int32Type, Int64Type, UInt32Type, UInt64Type,
};
use arrow_array::{ArrayRef, PrimitiveArray};
use arrow_schema::DataType;

use crate::columns::PodPropertyView;
use crate::error::{Error, ErrorCode, Result};
use crate::graph::{Edge, GraphTopology, Node, PropertyGraph, TxnContext};
use crate::reduce::{Accumulator, ReduceLogicalOr, ReduceMax};
use crate::runtime::{Bag, DoAllOptions, OrderedByIntegerMetric, do_all, for_each};

use super::{attach_node_column, is_approximate_degree_distribution_power_law};

const CHUNK_SIZE: usize = 64;

/// Algorithm selectors for SSSP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SsspAlgorithm {
    /// Delta-stepping over edge tiles.
    DeltaTile,
    /// Delta-stepping over nodes.
    DeltaStep,
    /// Delta-stepping with a barrier between buckets.
    DeltaStepBarrier,
    /// Delta-stepping with fused pushes; shares the delta-stepping
    /// strategy here.
    DeltaStepFusion,
    /// Serial delta-stepping over edge tiles.
    SerialDeltaTile,
    /// Serial delta-stepping over nodes.
    SerialDelta,
    /// Dijkstra with lazy deletion over edge tiles.
    DijkstraTile,
    /// Dijkstra with lazy deletion.
    Dijkstra,
    /// Wave-parallel relaxation in topological order; requires a DAG.
    Topological,
    /// Topological relaxation over edge tiles; requires a DAG.
    TopologicalTile,
    /// Chooses delta-stepping for power-law inputs, barrier delta-stepping
    /// otherwise.
    Automatic,
}

/// A computational plan for SSSP.
#[derive(Clone, Copy, Debug)]
pub struct SsspPlan {
    algorithm: SsspAlgorithm,
    delta: u32,
    edge_tile_size: usize,
}

impl SsspPlan {
    /// Default bucket shift: buckets group distances by `dist >> delta`.
    pub const DEFAULT_DELTA: u32 = 13;
    /// Default number of edges per tile.
    pub const DEFAULT_EDGE_TILE_SIZE: usize = 512;

    const fn with(algorithm: SsspAlgorithm, delta: u32, edge_tile_size: usize) -> Self {
        Self {
            algorithm,
            delta,
            edge_tile_size,
        }
    }

    /// Delta-stepping over edge tiles.
    #[must_use]
    pub const fn delta_tile(delta: u32, edge_tile_size: usize) -> Self {
        Self::with(SsspAlgorithm::DeltaTile, delta, edge_tile_size)
    }

    /// Delta-stepping over nodes.
    #[must_use]
    pub const fn delta_step(delta: u32) -> Self {
        Self::with(SsspAlgorithm::DeltaStep, delta, 0)
    }

    /// Barrier delta-stepping.
    #[must_use]
    pub const fn delta_step_barrier(delta: u32) -> Self {
        Self::with(SsspAlgorithm::DeltaStepBarrier, delta, 0)
    }

    /// Fused delta-stepping.
    #[must_use]
    pub const fn delta_step_fusion(delta: u32) -> Self {
        Self::with(SsspAlgorithm::DeltaStepFusion, delta, 0)
    }

    /// Serial delta-stepping over edge tiles.
    #[must_use]
    pub const fn serial_delta_tile(delta: u32, edge_tile_size: usize) -> Self {
        Self::with(SsspAlgorithm::SerialDeltaTile, delta, edge_tile_size)
    }

    /// Serial delta-stepping.
    #[must_use]
    pub const fn serial_delta(delta: u32) -> Self {
        Self::with(SsspAlgorithm::SerialDelta, delta, 0)
    }

    /// Dijkstra over edge tiles.
    #[must_use]
    pub const fn dijkstra_tile(edge_tile_size: usize) -> Self {
        Self::with(SsspAlgorithm::DijkstraTile, 0, edge_tile_size)
    }

    /// Dijkstra.
    #[must_use]
    pub const fn dijkstra() -> Self {
        Self::with(SsspAlgorithm::Dijkstra, 0, 0)
    }

    /// Topological-order relaxation.
    #[must_use]
    pub const fn topological() -> Self {
        Self::with(SsspAlgorithm::Topological, 0, 0)
    }

    /// Topological-order relaxation over edge tiles.
    #[must_use]
    pub const fn topological_tile(edge_tile_size: usize) -> Self {
        Self::with(SsspAlgorithm::TopologicalTile, 0, edge_tile_size)
    }

    /// Automatic strategy selection at run time.
    #[must_use]
    pub const fn automatic() -> Self {
        Self::with(SsspAlgorithm::Automatic, Self::DEFAULT_DELTA, 0)
    }

    /// Chooses a concrete strategy for `graph` up front.
    #[must_use]
    pub fn for_graph(graph: &PropertyGraph) -> Self {
        if is_approximate_degree_distribution_power_law(graph) {
            Self::delta_step(Self::DEFAULT_DELTA)
        } else {
            Self::delta_step_barrier(Self::DEFAULT_DELTA)
        }
    }

    /// Returns the selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> SsspAlgorithm {
        self.algorithm
    }

    /// Returns the bucket shift exponent.
    #[must_use]
    pub const fn delta(&self) -> u32 {
        self.delta
    }

    /// Returns the edge tile size.
    #[must_use]
    pub const fn edge_tile_size(&self) -> usize {
        self.edge_tile_size
    }
}

impl Default for SsspPlan {
    fn default() -> Self {
        Self::automatic()
    }
}

/// A distance domain usable by SSSP: the weight type itself, with an
/// infinity sentinel and a 64-bit encoding for atomic storage.
pub(crate) trait SsspWeight: Copy + PartialOrd + Send + Sync + 'static {
    const INFINITY: Self;
    const ZERO: Self;

    /// Adds without wrapping; saturates at the sentinel.
    fn add(self, other: Self) -> Self;
    fn encode(self) -> u64;
    fn decode(bits: u64) -> Self;
    /// Bucket index for delta-stepping: `floor(distance / 2^delta)`.
    fn bucket(self, delta: u32) -> usize;
    fn as_f64(self) -> f64;
    fn is_negative(self) -> bool;
}

macro_rules! impl_sssp_weight_uint {
    ($($t:ty),*) => {
        $(impl SsspWeight for $t {
            const INFINITY: Self = <$t>::MAX;
            const ZERO: Self = 0;

            fn add(self, other: Self) -> Self {
                self.saturating_add(other)
            }

            fn encode(self) -> u64 {
                self as u64
            }

            fn decode(bits: u64) -> Self {
                bits as $t
            }

            fn bucket(self, delta: u32) -> usize {
                (self >> delta.min(Self::BITS - 1)) as usize
            }

            fn as_f64(self) -> f64 {
                self as f64
            }

            fn is_negative(self) -> bool {
                false
            }
        })*
    };
}

impl_sssp_weight_uint!(u32, u64);

macro_rules! impl_sssp_weight_int {
    ($($t:ty),*) => {
        $(impl SsspWeight for $t {
            const INFINITY: Self = <$t>::MAX;
            const ZERO: Self = 0;

            fn add(self, other: Self) -> Self {
                self.saturating_add(other)
            }

            fn encode(self) -> u64 {
                // Distances are non-negative, so the cast round-trips.
                self as u64
            }

            fn decode(bits: u64) -> Self {
                bits as $t
            }

            fn bucket(self, delta: u32) -> usize {
                (self >> delta.min(Self::BITS - 1)) as usize
            }

            fn as_f64(self) -> f64 {
                self as f64
            }

            fn is_negative(self) -> bool {
                self < 0
            }
        })*
    };
}

impl_sssp_weight_int!(i32, i64);

impl SsspWeight for f32 {
    const INFINITY: Self = f32::INFINITY;
    const ZERO: Self = 0.0;

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn encode(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn decode(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }

    fn bucket(self, delta: u32) -> usize {
        (self / (1u64 << delta) as f32) as usize
    }

    fn as_f64(self) -> f64 {
        f64::from(self)
    }

    fn is_negative(self) -> bool {
        self < 0.0
    }
}

impl SsspWeight for f64 {
    const INFINITY: Self = f64::INFINITY;
    const ZERO: Self = 0.0;

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn encode(self) -> u64 {
        self.to_bits()
    }

    fn decode(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn bucket(self, delta: u32) -> usize {
        (self / (1u64 << delta) as f64) as usize
    }

    fn as_f64(self) -> f64 {
        self
    }

    fn is_negative(self) -> bool {
        self < 0.0
    }
}

/// Tentative distances with atomic lowering, stored as 64-bit encodings.
struct AtomicDistances<W> {
    cells: Vec<AtomicU64>,
    _weight: PhantomData<W>,
}

impl<W: SsspWeight> AtomicDistances<W> {
    fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU64::new(W::INFINITY.encode())).collect(),
            _weight: PhantomData,
        }
    }

    fn load(&self, index: usize) -> W {
        W::decode(self.cells[index].load(Ordering::Acquire))
    }

    fn store(&self, index: usize, value: W) {
        self.cells[index].store(value.encode(), Ordering::Release);
    }

    /// Lowers the cell to `candidate` if smaller; returns whether it
    /// improved.
    fn try_lower(&self, index: usize, candidate: W) -> bool {
        let cell = &self.cells[index];
        let mut current_bits = cell.load(Ordering::Acquire);
        loop {
            if W::decode(current_bits) <= candidate {
                return false;
            }
            match cell.compare_exchange_weak(
                current_bits,
                candidate.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current_bits = actual,
            }
        }
    }

    fn into_values(self) -> impl Iterator<Item = W> {
        self.cells.into_iter().map(|cell| W::decode(cell.into_inner()))
    }
}

#[derive(Clone, Copy, Debug)]
struct Request<W> {
    node: Node,
    dist: W,
}

#[derive(Clone, Debug)]
struct TileRequest<W> {
    node: Node,
    dist: W,
    edges: Range<Edge>,
}

fn tiles_of<W: SsspWeight>(
    topology: &GraphTopology,
    node: Node,
    dist: W,
    tile_size: usize,
) -> Vec<TileRequest<W>> {
    let range = topology.edges(node);
    let mut tiles = Vec::new();
    let mut begin = range.start;
    while begin < range.end {
        let end = (begin + tile_size as Edge).min(range.end);
        tiles.push(TileRequest {
            node,
            dist,
            edges: begin..end,
        });
        begin = end;
    }
    tiles
}

/// Relaxes one edge range, invoking `push` for each improved destination.
fn relax_edges<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source_dist: W,
    edges: Range<Edge>,
    mut push: impl FnMut(Node, W),
) {
    for edge in edges {
        let dst = topology.edge_dest(edge);
        let candidate = source_dist.add(weights.value(edge as usize));
        if dist.try_lower(dst as usize, candidate) {
            push(dst, candidate);
        }
    }
}

fn delta_step_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source: Node,
    delta: u32,
) {
    let worklist = OrderedByIntegerMetric::with_chunk_size(
        |request: &Request<W>| request.dist.bucket(delta),
        CHUNK_SIZE,
    );
    for_each(
        [Request {
            node: source,
            dist: W::ZERO,
        }],
        &worklist,
        |request, ctx| {
            if dist.load(request.node as usize) < request.dist {
                return;
            }
            relax_edges(
                topology,
                weights,
                dist,
                request.dist,
                topology.edges(request.node),
                |node, dist| ctx.push(Request { node, dist }),
            );
        },
    );
}

fn delta_tile_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source: Node,
    delta: u32,
    tile_size: usize,
) {
    let worklist = OrderedByIntegerMetric::with_chunk_size(
        |request: &TileRequest<W>| request.dist.bucket(delta),
        CHUNK_SIZE,
    );
    for_each(
        tiles_of(topology, source, W::ZERO, tile_size),
        &worklist,
        |request, ctx| {
            if dist.load(request.node as usize) < request.dist {
                return;
            }
            relax_edges(
                topology,
                weights,
                dist,
                request.dist,
                request.edges.clone(),
                |node, dist| {
                    for tile in tiles_of(topology, node, dist, tile_size) {
                        ctx.push(tile);
                    }
                },
            );
        },
    );
}

/// Barrier delta-stepping: one bucket at a time, each bucket drained with
/// data-parallel rounds separated by the `do_all` barrier.
fn delta_step_barrier_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source: Node,
    delta: u32,
) {
    let mut buckets: BTreeMap<usize, Vec<Request<W>>> = BTreeMap::new();
    buckets.entry(W::ZERO.bucket(delta)).or_default().push(Request {
        node: source,
        dist: W::ZERO,
    });

    while let Some((&bucket, _)) = buckets.first_key_value() {
        let Some(requests) = buckets.remove(&bucket) else {
            break;
        };
        let pushed = Bag::new();
        do_all(
            &requests,
            |request: &Request<W>| {
                if dist.load(request.node as usize) < request.dist {
                    return;
                }
                relax_edges(
                    topology,
                    weights,
                    dist,
                    request.dist,
                    topology.edges(request.node),
                    |node, dist| pushed.push(Request { node, dist }),
                );
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("sssp-bucket"),
        );
        for request in pushed.into_vec() {
            buckets
                .entry(request.dist.bucket(delta))
                .or_default()
                .push(request);
        }
    }
}

fn serial_delta_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source: Node,
    delta: u32,
    tile_size: Option<usize>,
) {
    let mut buckets: BTreeMap<usize, VecDeque<Request<W>>> = BTreeMap::new();
    buckets.entry(W::ZERO.bucket(delta)).or_default().push_back(Request {
        node: source,
        dist: W::ZERO,
    });

    while let Some((&bucket, _)) = buckets.first_key_value() {
        let Some(mut requests) = buckets.remove(&bucket) else {
            break;
        };
        while let Some(request) = requests.pop_front() {
            if dist.load(request.node as usize) < request.dist {
                continue;
            }
            // Tiling only changes the work-item granularity; the serial
            // variants walk each tile of the edge list in order.
            let ranges: Vec<Range<Edge>> = match tile_size {
                Some(tile_size) => tiles_of(topology, request.node, request.dist, tile_size)
                    .into_iter()
                    .map(|tile| tile.edges)
                    .collect(),
                None => vec![topology.edges(request.node)],
            };
            for range in ranges {
                relax_edges(topology, weights, dist, request.dist, range, |node, dist| {
                    let target = dist.bucket(delta);
                    let request = Request { node, dist };
                    if target == bucket {
                        requests.push_back(request);
                    } else {
                        buckets.entry(target).or_default().push_back(request);
                    }
                });
            }
        }
    }
}

struct HeapItem<W> {
    dist: W,
    node: Node,
    edges: Option<Range<Edge>>,
}

impl<W: SsspWeight> PartialEq for HeapItem<W> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<W: SsspWeight> Eq for HeapItem<W> {}

impl<W: SsspWeight> Ord for HeapItem<W> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Non-negative distances order the same as their encodings, and
        // BinaryHeap is a max-heap, so reverse for smallest-first.
        other
            .dist
            .encode()
            .cmp(&self.dist.encode())
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl<W: SsspWeight> PartialOrd for HeapItem<W> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

fn dijkstra_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    source: Node,
    tile_size: Option<usize>,
) {
    let mut heap = BinaryHeap::new();
    let mut push_node = |heap: &mut BinaryHeap<HeapItem<W>>, node: Node, node_dist: W| match tile_size {
        Some(tile_size) => {
            for tile in tiles_of(topology, node, node_dist, tile_size) {
                heap.push(HeapItem {
                    dist: node_dist,
                    node,
                    edges: Some(tile.edges),
                });
            }
        }
        None => heap.push(HeapItem {
            dist: node_dist,
            node,
            edges: None,
        }),
    };
    push_node(&mut heap, source, W::ZERO);

    while let Some(item) = heap.pop() {
        // Lazy deletion: only the entry matching the settled distance runs.
        if dist.load(item.node as usize) < item.dist {
            continue;
        }
        let range = item.edges.clone().unwrap_or_else(|| topology.edges(item.node));
        let mut improved = Vec::new();
        relax_edges(topology, weights, dist, item.dist, range, |node, dist| {
            improved.push((node, dist));
        });
        for (node, node_dist) in improved {
            push_node(&mut heap, node, node_dist);
        }
    }
}

/// Wave-parallel relaxation in topological order. Fails when the graph has
/// a cycle.
fn topological_algo<W: SsspWeight, P: ArrowPrimitiveType<Native = W>>(
    topology: &GraphTopology,
    weights: &PodPropertyView<'_, P>,
    dist: &AtomicDistances<W>,
    tile_size: Option<usize>,
) -> Result<()> {
    let num_nodes = topology.num_nodes();
    let in_degrees: Vec<AtomicU64> = {
        let counts = vec![0u64; num_nodes];
        let counts: Vec<AtomicU64> = counts.into_iter().map(AtomicU64::new).collect();
        do_all(
            0..num_nodes as Node,
            |node| {
                for edge in topology.edges(node) {
                    in_degrees_bump(&counts, topology.edge_dest(edge));
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("sssp-indegree"),
        );
        counts
    };

    let mut wave: Vec<Node> = (0..num_nodes as Node)
        .filter(|&node| in_degrees[node as usize].load(Ordering::Acquire) == 0)
        .collect();
    let mut processed = 0usize;

    while !wave.is_empty() {
        processed += wave.len();
        let next = Bag::new();
        do_all(
            &wave,
            |&node| {
                let node_dist = dist.load(node as usize);
                let ranges: Vec<Range<Edge>> = match tile_size {
                    Some(tile_size) => tiles_of(topology, node, node_dist, tile_size)
                        .into_iter()
                        .map(|tile| tile.edges)
                        .collect(),
                    None => vec![topology.edges(node)],
                };
                for range in ranges {
                    for edge in range {
                        let dst = topology.edge_dest(edge);
                        let candidate = node_dist.add(weights.value(edge as usize));
                        dist.try_lower(dst as usize, candidate);
                        if in_degrees[dst as usize].fetch_sub(1, Ordering::AcqRel) == 1 {
                            next.push(dst);
                        }
                    }
                }
            },
            DoAllOptions::new().steal().chunk_size(CHUNK_SIZE).name("sssp-wave"),
        );
        wave = next.into_vec();
    }

    if processed != num_nodes {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("topological SSSP requires an acyclic graph"));
    }
    Ok(())
}

fn in_degrees_bump(counts: &[AtomicU64], node: Node) {
    counts[node as usize].fetch_add(1, Ordering::AcqRel);
}

fn run_sssp<P>(
    graph: &mut PropertyGraph,
    start_node: Node,
    edge_weight_property_name: &str,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: SsspPlan,
) -> Result<()>
where
    P: ArrowPrimitiveType,
    P::Native: SsspWeight,
{
    if (start_node as usize) >= graph.num_nodes() {
        return Err(Error::new(ErrorCode::InvalidArgument).with_context(format!(
            "start node {start_node} is out of range for {} nodes",
            graph.num_nodes()
        )));
    }

    let algorithm = match plan.algorithm() {
        SsspAlgorithm::Automatic => resolve_automatic(graph),
        other => other,
    };
    let delta = plan.delta();
    let tile_size = if plan.edge_tile_size() > 0 {
        plan.edge_tile_size()
    } else {
        SsspPlan::DEFAULT_EDGE_TILE_SIZE
    };

    txn.record_edge_read(edge_weight_property_name);
    let weights = graph.edge_pod_view::<P>(edge_weight_property_name)?;
    let dist = AtomicDistances::<P::Native>::new(graph.num_nodes());
    dist.store(start_node as usize, <P::Native as SsspWeight>::ZERO);

    let topology = graph.topology();
    match algorithm {
        SsspAlgorithm::DeltaTile => {
            delta_tile_algo(topology, &weights, &dist, start_node, delta, tile_size);
        }
        SsspAlgorithm::DeltaStep | SsspAlgorithm::DeltaStepFusion => {
            delta_step_algo(topology, &weights, &dist, start_node, delta);
        }
        SsspAlgorithm::DeltaStepBarrier => {
            delta_step_barrier_algo(topology, &weights, &dist, start_node, delta);
        }
        SsspAlgorithm::SerialDeltaTile => {
            serial_delta_algo(topology, &weights, &dist, start_node, delta, Some(tile_size));
        }
        SsspAlgorithm::SerialDelta => {
            serial_delta_algo(topology, &weights, &dist, start_node, delta, None);
        }
        SsspAlgorithm::DijkstraTile => {
            dijkstra_algo(topology, &weights, &dist, start_node, Some(tile_size));
        }
        SsspAlgorithm::Dijkstra => {
            dijkstra_algo(topology, &weights, &dist, start_node, None);
        }
        SsspAlgorithm::Topological => {
            topological_algo(topology, &weights, &dist, None)?;
        }
        SsspAlgorithm::TopologicalTile => {
            topological_algo(topology, &weights, &dist, Some(tile_size))?;
        }
        SsspAlgorithm::Automatic => {
            return Err(Error::new(ErrorCode::InvalidArgument)
                .with_context("automatic plan failed to resolve"));
        }
    }

    let column: ArrayRef = Arc::new(PrimitiveArray::<P>::from_iter_values(dist.into_values()));
    attach_node_column(graph, txn, output_property_name, column)
}

fn resolve_automatic(graph: &PropertyGraph) -> SsspAlgorithm {
    if is_approximate_degree_distribution_power_law(graph) {
        SsspAlgorithm::DeltaStep
    } else {
        SsspAlgorithm::DeltaStepBarrier
    }
}

/// Computes shortest-path distances from `start_node` using the weights in
/// `edge_weight_property_name` and attaches them as a node property of the
/// same numeric type named `output_property_name`.
///
/// Unreachable nodes carry the weight type's distance infinity (integer
/// maximum, floating-point infinity).
pub fn sssp(
    graph: &mut PropertyGraph,
    start_node: Node,
    edge_weight_property_name: &str,
    output_property_name: &str,
    txn: &mut TxnContext,
    plan: SsspPlan,
) -> Result<()> {
    let data_type = graph.edge_property(edge_weight_property_name)?.data_type().clone();
    match data_type {
        DataType::UInt32 => run_sssp::<UInt32Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        DataType::Int32 => run_sssp::<Int32Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        DataType::UInt64 => run_sssp::<UInt64Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        DataType::Int64 => run_sssp::<Int64Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        DataType::Float32 => run_sssp::<Float32Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        DataType::Float64 => run_sssp::<Float64Type>(
            graph, start_node, edge_weight_property_name, output_property_name, txn, plan,
        ),
        other => Err(Error::new(ErrorCode::TypeError).with_context(format!(
            "edge weight property `{edge_weight_property_name}` has unsupported type {other}"
        ))),
    }
}

fn assert_valid_with<P>(
    graph: &PropertyGraph,
    start_node: Node,
    edge_weight_property_name: &str,
    output_property_name: &str,
) -> Result<()>
where
    P: ArrowPrimitiveType,
    P::Native: SsspWeight,
{
    let weights = graph.edge_pod_view::<P>(edge_weight_property_name)?;
    let dist = graph.node_pod_view::<P>(output_property_name)?;
    if dist.len() != graph.num_nodes() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("distance property length does not match node count"));
    }
    if dist.value(start_node as usize) != <P::Native as SsspWeight>::ZERO {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("source node does not have distance 0"));
    }

    let negative = ReduceLogicalOr::new();
    let inconsistent = ReduceLogicalOr::new();
    do_all(
        graph.nodes(),
        |node| {
            let du = dist.value(node as usize);
            if du.is_negative() {
                negative.update(true);
            }
            if du == <P::Native as SsspWeight>::INFINITY {
                return;
            }
            for edge in graph.edges(node) {
                let dv = dist.value(graph.edge_dest(edge) as usize);
                if dv == <P::Native as SsspWeight>::INFINITY {
                    continue;
                }
                if dv > du.add(weights.value(edge as usize)) {
                    inconsistent.update(true);
                }
            }
        },
        DoAllOptions::new().steal().name("sssp-validate"),
    );
    if negative.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("a node has a negative distance"));
    }
    if inconsistent.reduce() {
        return Err(Error::new(ErrorCode::AssertionFailed)
            .with_context("an edge admits a shorter path than the stored distance"));
    }
    Ok(())
}

/// Checks the SSSP output invariants: the source at distance zero, no
/// negative distances, and triangle consistency across every edge.
pub fn sssp_assert_valid(
    graph: &PropertyGraph,
    start_node: Node,
    edge_weight_property_name: &str,
    output_property_name: &str,
) -> Result<()> {
    let data_type = graph.edge_property(edge_weight_property_name)?.data_type().clone();
    match data_type {
        DataType::UInt32 => {
            assert_valid_with::<UInt32Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        DataType::Int32 => {
            assert_valid_with::<Int32Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        DataType::UInt64 => {
            assert_valid_with::<UInt64Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        DataType::Int64 => {
            assert_valid_with::<Int64Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        DataType::Float32 => {
            assert_valid_with::<Float32Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        DataType::Float64 => {
            assert_valid_with::<Float64Type>(graph, start_node, edge_weight_property_name, output_property_name)
        }
        other => Err(Error::new(ErrorCode::TypeError)
            .with_context(format!("unsupported edge weight type {other}"))),
    }
}

/// Summary statistics over an SSSP distance property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsspStatistics {
    /// The number of nodes reachable from the source.
    pub n_reached_nodes: u64,
    /// The largest finite distance.
    pub max_distance: f64,
    /// The mean distance over reached nodes.
    pub average_visited_distance: f64,
}

impl SsspStatistics {
    fn compute_with<P>(graph: &PropertyGraph, output_property_name: &str) -> Result<Self>
    where
        P: ArrowPrimitiveType,
        P::Native: SsspWeight,
    {
        let dist = graph.node_pod_view::<P>(output_property_name)?;
        let max_dist = ReduceMax::<f64>::new();
        let total = Accumulator::<f64>::new();
        let reached = Accumulator::<u64>::new();
        do_all(
            graph.nodes(),
            |node| {
                let distance = dist.value(node as usize);
                if distance != <P::Native as SsspWeight>::INFINITY {
                    max_dist.update(distance.as_f64());
                    total.update(distance.as_f64());
                    reached.update(1);
                }
            },
            DoAllOptions::new().steal().name("sssp-statistics"),
        );
        let n_reached_nodes = reached.reduce();
        let average = if n_reached_nodes == 0 {
            0.0
        } else {
            total.reduce() / n_reached_nodes as f64
        };
        Ok(Self {
            n_reached_nodes,
            max_distance: if n_reached_nodes == 0 { 0.0 } else { max_dist.reduce() },
            average_visited_distance: average,
        })
    }

    /// Computes statistics over the named distance property.
    pub fn compute(graph: &PropertyGraph, output_property_name: &str) -> Result<Self> {
        let data_type = graph.node_property(output_property_name)?.data_type().clone();
        match data_type {
            DataType::UInt32 => Self::compute_with::<UInt32Type>(graph, output_property_name),
            DataType::Int32 => Self::compute_with::<Int32Type>(graph, output_property_name),
            DataType::UInt64 => Self::compute_with::<UInt64Type>(graph, output_property_name),
            DataType::Int64 => Self::compute_with::<Int64Type>(graph, output_property_name),
            DataType::Float32 => Self::compute_with::<Float32Type>(graph, output_property_name),
            DataType::Float64 => Self::compute_with::<Float64Type>(graph, output_property_name),
            other => Err(Error::new(ErrorCode::TypeError)
                .with_context(format!("unsupported distance type {other}"))),
        }
    }
}

impl fmt::Display for SsspStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of reached nodes = {}", self.n_reached_nodes)?;
        writeln!(f, "Maximum distance = {}", self.max_distance)?;
        writeln!(f, "Average distance = {}", self.average_visited_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphTopologyBuilder, PropertyTable};
    use arrow_array::{Float64Array, UInt32Array};
    use rstest::rstest;

    /// The 4-node diamond: 0->1 (2), 1->2 (3), 0->2 (10), 2->3 (1).
    fn diamond_graph() -> PropertyGraph {
        let mut builder = GraphTopologyBuilder::new();
        builder.add_nodes(4);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        builder.add_edge(0, 2);
        builder.add_edge(2, 3);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        // CSR edge order: (0,1), (0,2), (1,2), (2,3).
        let weights: Vec<u32> = vec![2, 10, 3, 1];
        let mut table = PropertyTable::new();
        table
            .add_column("weight", Arc::new(UInt32Array::from(weights)) as ArrayRef)
            .expect("fresh column");
        let mut txn = TxnContext::new();
        graph.add_edge_properties(table, &mut txn).expect("weights attach");
        graph
    }

    fn distances(graph: &PropertyGraph, name: &str) -> Vec<u32> {
        let view = graph.node_pod_view::<UInt32Type>(name).expect("typed view");
        graph.nodes().map(|n| view.value(n as usize)).collect()
    }

    #[rstest]
    #[case::delta_step(SsspPlan::delta_step(3))]
    #[case::delta_tile(SsspPlan::delta_tile(3, 2))]
    #[case::delta_barrier(SsspPlan::delta_step_barrier(3))]
    #[case::delta_fusion(SsspPlan::delta_step_fusion(3))]
    #[case::serial_delta(SsspPlan::serial_delta(3))]
    #[case::serial_delta_tile(SsspPlan::serial_delta_tile(3, 2))]
    #[case::dijkstra(SsspPlan::dijkstra())]
    #[case::dijkstra_tile(SsspPlan::dijkstra_tile(2))]
    #[case::topological(SsspPlan::topological())]
    #[case::topological_tile(SsspPlan::topological_tile(2))]
    #[case::automatic(SsspPlan::automatic())]
    fn diamond_distances_are_shortest(#[case] plan: SsspPlan) {
        let mut graph = diamond_graph();
        let mut txn = TxnContext::new();
        sssp(&mut graph, 0, "weight", "dist", &mut txn, plan).expect("sssp succeeds");
        assert_eq!(distances(&graph, "dist"), vec![0, 2, 5, 6]);
        sssp_assert_valid(&graph, 0, "weight", "dist").expect("output is valid");
    }

    #[test]
    fn float_weights_take_the_float_path() {
        let mut builder = GraphTopologyBuilder::new();
        builder.add_nodes(3);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut table = PropertyTable::new();
        table
            .add_column("weight", Arc::new(Float64Array::from(vec![0.5, 1.25])) as ArrayRef)
            .expect("fresh column");
        let mut txn = TxnContext::new();
        graph.add_edge_properties(table, &mut txn).expect("weights attach");

        sssp(&mut graph, 0, "weight", "dist", &mut txn, SsspPlan::delta_step(0))
            .expect("sssp succeeds");
        let view = graph.node_pod_view::<Float64Type>("dist").expect("typed view");
        assert!((view.value(2) - 1.75).abs() < 1e-12);
        sssp_assert_valid(&graph, 0, "weight", "dist").expect("output is valid");
    }

    #[test]
    fn unsupported_weight_type_is_a_type_error() {
        let mut builder = GraphTopologyBuilder::new();
        builder.add_nodes(2);
        builder.add_edge(0, 1);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut table = PropertyTable::new();
        table
            .add_column(
                "weight",
                Arc::new(arrow_array::UInt8Array::from(vec![1u8])) as ArrayRef,
            )
            .expect("fresh column");
        let mut txn = TxnContext::new();
        graph.add_edge_properties(table, &mut txn).expect("weights attach");
        let err = sssp(&mut graph, 0, "weight", "dist", &mut txn, SsspPlan::default())
            .expect_err("unsupported weight type");
        assert_eq!(err.code(), ErrorCode::TypeError);
    }

    #[test]
    fn out_of_range_source_is_rejected() {
        let mut graph = diamond_graph();
        let mut txn = TxnContext::new();
        let err = sssp(&mut graph, 10, "weight", "dist", &mut txn, SsspPlan::dijkstra())
            .expect_err("source out of range");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn topological_rejects_cycles() {
        let mut builder = GraphTopologyBuilder::new();
        builder.add_nodes(2);
        builder.add_edge(0, 1);
        builder.add_edge(1, 0);
        let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
        let mut table = PropertyTable::new();
        table
            .add_column("weight", Arc::new(UInt32Array::from(vec![1u32, 1])) as ArrayRef)
            .expect("fresh column");
        let mut txn = TxnContext::new();
        graph.add_edge_properties(table, &mut txn).expect("weights attach");
        let err = sssp(&mut graph, 0, "weight", "dist", &mut txn, SsspPlan::topological())
            .expect_err("cyclic input");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn statistics_summarise_reachability() {
        let mut graph = diamond_graph();
        let mut txn = TxnContext::new();
        sssp(&mut graph, 0, "weight", "dist", &mut txn, SsspPlan::dijkstra())
            .expect("sssp succeeds");
        let stats = SsspStatistics::compute(&graph, "dist").expect("statistics");
        assert_eq!(stats.n_reached_nodes, 4);
        assert!((stats.max_distance - 6.0).abs() < f64::EPSILON);
        assert!((stats.average_visited_distance - 3.25).abs() < f64::EPSILON);
    }
}
