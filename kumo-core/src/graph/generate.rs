//! Synthetic topology generators and closure-driven property generation.
//!
//! The generators build small symmetric graphs for tests and examples; all
//! of them run single-threaded through the symmetric builder.

use std::sync::Arc;

use arrow_array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
    UInt32Array, UInt64Array,
};

use crate::error::{Error, ErrorCode, Result};

use super::property_graph::{PropertyGraph, PropertyTable, TxnContext};
use super::topology::SymmetricGraphTopologyBuilder;

fn make_symmetric(
    num_nodes: usize,
    populate: impl FnOnce(&mut SymmetricGraphTopologyBuilder),
) -> Result<PropertyGraph> {
    let mut builder = SymmetricGraphTopologyBuilder::new();
    builder.add_nodes(num_nodes);
    populate(&mut builder);
    Ok(PropertyGraph::from_topology(builder.into_csr()?))
}

/// Generates a regular `width x height` grid, optionally with both
/// diagonals in every cell.
pub fn make_grid(width: usize, height: usize, with_diagonals: bool) -> Result<PropertyGraph> {
    if width == 0 || height == 0 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("grid dimensions must be positive"));
    }
    let total_nodes = width * height;

    make_symmetric(total_nodes, |builder| {
        for n in 0..total_nodes.saturating_sub(1) {
            let n32 = n as u32;
            if (n + 1) % width == 0 {
                // Right boundary: only the vertical edge remains.
                builder.add_edge(n32, (n + width) as u32);
            } else if n >= total_nodes - width {
                // Bottom boundary: only the horizontal edge remains.
                builder.add_edge(n32, n32 + 1);
            } else {
                builder.add_edge(n32, n32 + 1);
                builder.add_edge(n32, (n + width) as u32);
                if with_diagonals {
                    builder.add_edge(n32, (n + width + 1) as u32);
                    builder.add_edge(n32 + 1, (n + width) as u32);
                }
            }
        }
    })
}

/// Generates a Ferris wheel: `num_nodes - 1` rim nodes each connected to
/// both rim neighbours and to the hub node 0.
pub fn make_ferris_wheel(num_nodes: usize) -> Result<PropertyGraph> {
    if num_nodes <= 4 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("a ferris wheel needs more than 4 nodes"));
    }

    make_symmetric(num_nodes, |builder| {
        for n in 1..num_nodes {
            builder.add_edge(n as u32, 0);
            let next = if n < num_nodes - 1 { n + 1 } else { 1 };
            builder.add_edge(n as u32, next as u32);
        }
    })
}

/// Generates a sawtooth strip: `length` teeth over a base row of
/// `length + 1` nodes.
pub fn make_sawtooth(length: usize) -> Result<PropertyGraph> {
    if length == 0 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("a sawtooth needs at least one tooth"));
    }

    make_symmetric(2 * length + 1, |builder| {
        // Tooth sides.
        for n in (1..2 * length).step_by(2) {
            builder.add_edge(n as u32, (n - 1) as u32);
            builder.add_edge(n as u32, (n + 1) as u32);
        }
        // Tooth base.
        for n in (0..2 * length - 1).step_by(2) {
            builder.add_edge(n as u32, (n + 2) as u32);
        }
    })
}

/// Generates a complete graph on `num_nodes` nodes.
pub fn make_clique(num_nodes: usize) -> Result<PropertyGraph> {
    if num_nodes <= 2 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("a clique needs more than 2 nodes"));
    }

    make_symmetric(num_nodes, |builder| {
        for n in 0..num_nodes {
            for m in n + 1..num_nodes {
                builder.add_edge(n as u32, m as u32);
            }
        }
    })
}

/// Generates a triangular array with `num_rows` rows of triangles.
pub fn make_triangle(num_rows: usize) -> Result<PropertyGraph> {
    if num_rows == 0 {
        return Err(Error::new(ErrorCode::InvalidArgument)
            .with_context("a triangular array needs at least one row"));
    }
    let total_nodes = (num_rows + 1) * (num_rows + 2) / 2;

    make_symmetric(total_nodes, |builder| {
        let mut starting_idx = 0;
        let mut row_nodes = 1;
        for _ in 0..num_rows {
            let ending_idx = starting_idx + row_nodes;
            for n in starting_idx..ending_idx {
                builder.add_edge(n as u32, (n + row_nodes) as u32);
                builder.add_edge(n as u32, (n + row_nodes + 1) as u32);
                builder.add_edge((n + row_nodes) as u32, (n + row_nodes + 1) as u32);
            }
            starting_idx = ending_idx;
            row_nodes += 1;
        }
    })
}

/// A value type a property generator can produce.
pub trait ColumnValue: Sized {
    /// Builds an Arrow column from generated values in id order.
    fn into_column(values: Vec<Self>) -> ArrayRef;
}

macro_rules! impl_column_value {
    ($($t:ty => $array:ty),*) => {
        $(impl ColumnValue for $t {
            fn into_column(values: Vec<Self>) -> ArrayRef {
                Arc::new(<$array>::from_iter_values(values))
            }
        })*
    };
}

impl_column_value!(
    u32 => UInt32Array,
    u64 => UInt64Array,
    i32 => Int32Array,
    i64 => Int64Array,
    f32 => Float32Array,
    f64 => Float64Array
);

impl ColumnValue for bool {
    fn into_column(values: Vec<Self>) -> ArrayRef {
        Arc::new(BooleanArray::from(values))
    }
}

impl ColumnValue for String {
    fn into_column(values: Vec<Self>) -> ArrayRef {
        Arc::new(LargeStringArray::from_iter_values(values))
    }
}

/// A named `id -> value` function used to materialise one property column.
pub struct PropertyGenerator<F> {
    name: String,
    value: F,
}

impl<F> PropertyGenerator<F> {
    /// Pairs a property name with its value function.
    pub fn new(name: impl Into<String>, value: F) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Object-safe face of [`PropertyGenerator`], so generators of different
/// value types can be passed together.
pub trait ColumnGenerator {
    /// Returns the property name.
    fn name(&self) -> &str;

    /// Builds the column for element ids `0..count`.
    fn generate(&self, count: usize) -> Result<ArrayRef>;
}

impl<F, V> ColumnGenerator for PropertyGenerator<F>
where
    F: Fn(u64) -> V,
    V: ColumnValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, count: usize) -> Result<ArrayRef> {
        let values = (0..count as u64).map(&self.value).collect();
        Ok(V::into_column(values))
    }
}

fn build_table(generators: &[&dyn ColumnGenerator], count: usize) -> Result<PropertyTable> {
    // Build every column before attaching: a failing generator leaves the
    // graph untouched.
    let mut table = PropertyTable::new();
    for generator in generators {
        let column = generator.generate(count)?;
        table.add_column(generator.name(), column)?;
    }
    Ok(table)
}

/// Adds one node property per generator, evaluated in node-id order.
///
/// If any generator fails, no columns are attached.
pub fn add_node_properties(
    graph: &mut PropertyGraph,
    txn: &mut TxnContext,
    generators: &[&dyn ColumnGenerator],
) -> Result<()> {
    let table = build_table(generators, graph.num_nodes())?;
    graph.add_node_properties(table, txn)
}

/// Adds one edge property per generator, evaluated in edge-id order.
///
/// If any generator fails, no columns are attached.
pub fn add_edge_properties(
    graph: &mut PropertyGraph,
    txn: &mut TxnContext,
    generators: &[&dyn ColumnGenerator],
) -> Result<()> {
    let table = build_table(generators, graph.num_edges())?;
    graph.add_edge_properties(table, txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::types::{Float64Type, UInt32Type};

    #[test]
    fn grid_with_diagonals_is_a_4_clique_for_2x2() {
        let graph = make_grid(2, 2, true).expect("valid grid");
        assert_eq!(graph.num_nodes(), 4);
        // Every unordered pair is connected, mirrored by symmetry.
        assert_eq!(graph.num_edges(), 12);
        assert!(graph.topology().is_symmetric());
    }

    #[test]
    fn grid_without_diagonals_is_sparser() {
        let graph = make_grid(3, 2, false).expect("valid grid");
        assert_eq!(graph.num_nodes(), 6);
        // 7 undirected edges: 4 horizontal + 3 vertical.
        assert_eq!(graph.num_edges(), 14);
    }

    #[test]
    fn ferris_wheel_hub_touches_every_rim_node() {
        let graph = make_ferris_wheel(9).expect("valid wheel");
        assert_eq!(graph.num_nodes(), 9);
        assert_eq!(graph.out_degree(0), 8);
        for rim in 1..9 {
            assert_eq!(graph.out_degree(rim), 3);
        }
    }

    #[test]
    fn sawtooth_has_expected_shape() {
        let graph = make_sawtooth(3).expect("valid sawtooth");
        assert_eq!(graph.num_nodes(), 7);
        // 3 teeth * 2 sides + 3 base edges, mirrored.
        assert_eq!(graph.num_edges(), 18);
    }

    #[test]
    fn clique_connects_every_pair() {
        let graph = make_clique(4).expect("valid clique");
        assert_eq!(graph.num_edges(), 12);
        for node in graph.nodes() {
            assert_eq!(graph.out_degree(node), 3);
        }
    }

    #[test]
    fn triangle_row_counts_match() {
        let graph = make_triangle(2).expect("valid triangle");
        assert_eq!(graph.num_nodes(), 6);
        // 3 triangles of 3 edges each, mirrored.
        assert_eq!(graph.num_edges(), 18);
    }

    #[test]
    fn degenerate_generator_arguments_are_rejected() {
        assert!(make_grid(0, 3, false).is_err());
        assert!(make_ferris_wheel(4).is_err());
        assert!(make_sawtooth(0).is_err());
        assert!(make_clique(2).is_err());
        assert!(make_triangle(0).is_err());
    }

    #[test]
    fn property_generators_fill_in_id_order() {
        let mut graph = make_clique(3).expect("valid clique");
        let mut txn = TxnContext::new();
        let rank = PropertyGenerator::new("rank", |id: u64| id as u32 * 2);
        let mass = PropertyGenerator::new("mass", |id: u64| id as f64 + 0.5);
        add_node_properties(&mut graph, &mut txn, &[&rank, &mass]).expect("columns attach");

        let rank_view = graph.node_pod_view::<UInt32Type>("rank").expect("typed view");
        let mass_view = graph.node_pod_view::<Float64Type>("mass").expect("typed view");
        assert_eq!(rank_view.value(2), 4);
        assert!((mass_view.value(1) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn failing_generator_attaches_nothing() {
        let mut graph = make_clique(3).expect("valid clique");
        let mut txn = TxnContext::new();
        let first = PropertyGenerator::new("dup", |id: u64| id as u32);
        let second = PropertyGenerator::new("dup", |id: u64| id as u32);
        let err = add_node_properties(&mut graph, &mut txn, &[&first, &second])
            .expect_err("duplicate generator names");
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        assert!(graph.node_property("dup").is_err());
    }
}
