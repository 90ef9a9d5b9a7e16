//! Columnar property graphs: CSR topology plus typed property tables.

mod generate;
mod property_graph;
mod topology;

pub use self::{
    generate::{
        ColumnGenerator, ColumnValue, PropertyGenerator, add_edge_properties,
        add_node_properties, make_clique, make_ferris_wheel, make_grid, make_sawtooth,
        make_triangle,
    },
    property_graph::{MutablePropertyView, PropertyGraph, PropertyTable, TxnContext},
    topology::{
        Edge, GraphTopology, GraphTopologyBuilder, Node, SymmetricGraphTopologyBuilder,
        TransposedTopology,
    },
};
