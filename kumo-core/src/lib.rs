//! Kumo core library: parallel analytics over columnar property graphs.

pub mod analytics;
mod atomic;
mod bitset;
mod columns;
mod env;
mod error;
mod graph;
mod reduce;
mod runtime;

pub use crate::{
    atomic::AtomicF64,
    bitset::DynamicBitset,
    columns::{FixedSizeListView, PodPropertyView, StringPropertyView},
    env::{ENABLE_EXPERIMENTAL_ENV, experimental_feature_enabled, experimental_features},
    error::{CopyableError, Error, ErrorCode, Result},
    graph::{
        ColumnGenerator, ColumnValue, Edge, GraphTopology, GraphTopologyBuilder,
        MutablePropertyView, Node, PropertyGenerator, PropertyGraph, PropertyTable,
        SymmetricGraphTopologyBuilder, TransposedTopology, TxnContext, add_edge_properties,
        add_node_properties, make_clique, make_ferris_wheel, make_grid, make_sawtooth,
        make_triangle,
    },
    reduce::{
        Accumulator, AndOp, BoundedValue, Combine, CombinedError, FirstOp, MaxOp, MinOp, OrOp,
        Reducible, ReduceLogicalAnd, ReduceLogicalOr, ReduceMax, ReduceMin, SumOp,
    },
    runtime::{
        Bag, BulkSynchronous, ChunkedFifo, ChunkedLifo, DeterministicContext, DoAllOptions,
        OrderedByIntegerMetric, PerThreadStorage, PhaseBarrier, UserContext, Worklist,
        active_threads, current_worker, do_all, for_each, for_each_deterministic, on_each,
        set_active_threads,
    },
};
