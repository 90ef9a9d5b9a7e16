//! Property tables and the property graph.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use arrow_array::ArrayRef;
use arrow_array::types::ArrowPrimitiveType;

use crate::columns::{FixedSizeListView, PodPropertyView};
use crate::error::{Error, ErrorCode, Result};

use super::topology::{Edge, GraphTopology, Node, TransposedTopology};

/// An ordered mapping from property name to a typed column.
#[derive(Clone, Debug, Default)]
pub struct PropertyTable {
    columns: Vec<(String, ArrayRef)>,
}

impl PropertyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from `(name, column)` pairs, rejecting duplicate
    /// names.
    pub fn from_columns(columns: Vec<(String, ArrayRef)>) -> Result<Self> {
        let mut names = BTreeSet::new();
        for (name, _) in &columns {
            if !names.insert(name.as_str()) {
                return Err(Error::new(ErrorCode::AlreadyExists)
                    .with_context(format!("duplicate column `{name}`")));
            }
        }
        Ok(Self { columns })
    }

    /// Appends a column, rejecting duplicate names.
    pub fn add_column(&mut self, name: impl Into<String>, column: ArrayRef) -> Result<()> {
        let name = name.into();
        if self.column(&name).is_some() {
            return Err(Error::new(ErrorCode::AlreadyExists)
                .with_context(format!("duplicate column `{name}`")));
        }
        self.columns.push((name, column));
        Ok(())
    }

    /// Looks a column up by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, column)| column)
    }

    /// Removes a column by name.
    pub fn remove_column(&mut self, name: &str) -> Result<()> {
        let index = self
            .columns
            .iter()
            .position(|(candidate, _)| candidate == name)
            .ok_or_else(|| {
                Error::new(ErrorCode::PropertyNotFound)
                    .with_context(format!("no column `{name}`"))
            })?;
        self.columns.remove(index);
        Ok(())
    }

    /// Returns the column names in attachment order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns the `(name, column)` pairs in attachment order.
    #[must_use]
    pub fn columns(&self) -> &[(String, ArrayRef)] {
        &self.columns
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns whether the table holds no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Records which properties an operation touched.
///
/// Carried through analytics entry points for observability only; it
/// provides no isolation.
#[derive(Debug, Default)]
pub struct TxnContext {
    node_properties_read: BTreeSet<String>,
    node_properties_written: BTreeSet<String>,
    edge_properties_read: BTreeSet<String>,
    edge_properties_written: BTreeSet<String>,
}

impl TxnContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a node-property read.
    pub fn record_node_read(&mut self, name: impl Into<String>) {
        self.node_properties_read.insert(name.into());
    }

    /// Records a node-property write.
    pub fn record_node_write(&mut self, name: impl Into<String>) {
        self.node_properties_written.insert(name.into());
    }

    /// Records an edge-property read.
    pub fn record_edge_read(&mut self, name: impl Into<String>) {
        self.edge_properties_read.insert(name.into());
    }

    /// Records an edge-property write.
    pub fn record_edge_write(&mut self, name: impl Into<String>) {
        self.edge_properties_written.insert(name.into());
    }

    /// Returns the node properties read so far.
    #[must_use]
    pub fn node_properties_read(&self) -> &BTreeSet<String> {
        &self.node_properties_read
    }

    /// Returns the node properties written so far.
    #[must_use]
    pub fn node_properties_written(&self) -> &BTreeSet<String> {
        &self.node_properties_written
    }

    /// Returns the edge properties read so far.
    #[must_use]
    pub fn edge_properties_read(&self) -> &BTreeSet<String> {
        &self.edge_properties_read
    }

    /// Returns the edge properties written so far.
    #[must_use]
    pub fn edge_properties_written(&self) -> &BTreeSet<String> {
        &self.edge_properties_written
    }
}

/// A CSR topology plus node and edge property tables.
///
/// The topology is shared (and immutable); property columns are immutable
/// Arrow arrays added and removed as units. Analytics attach their output as
/// a new column and never mutate existing ones in place.
#[derive(Debug)]
pub struct PropertyGraph {
    topology: Arc<GraphTopology>,
    transposed: OnceLock<TransposedTopology>,
    node_table: PropertyTable,
    edge_table: PropertyTable,
}

impl PropertyGraph {
    /// Wraps a topology with empty property tables.
    #[must_use]
    pub fn from_topology(topology: GraphTopology) -> Self {
        Self {
            topology: Arc::new(topology),
            transposed: OnceLock::new(),
            node_table: PropertyTable::new(),
            edge_table: PropertyTable::new(),
        }
    }

    /// Returns the topology.
    #[must_use]
    pub fn topology(&self) -> &GraphTopology {
        &self.topology
    }

    /// Returns the node count.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.topology.num_nodes()
    }

    /// Returns the edge count.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.topology.num_edges()
    }

    /// Returns the ordered node id range.
    #[must_use]
    pub fn nodes(&self) -> std::ops::Range<Node> {
        self.topology.nodes()
    }

    /// Returns the edge id range of `node`'s outgoing edges.
    #[must_use]
    pub fn edges(&self, node: Node) -> std::ops::Range<Edge> {
        self.topology.edges(node)
    }

    /// Returns the destination of `edge`.
    #[must_use]
    pub fn edge_dest(&self, edge: Edge) -> Node {
        self.topology.edge_dest(edge)
    }

    /// Returns the out-degree of `node`.
    #[must_use]
    pub fn out_degree(&self, node: Node) -> usize {
        self.topology.out_degree(node)
    }

    /// Returns the lazily built transposed view.
    #[must_use]
    pub fn transposed(&self) -> &TransposedTopology {
        self.transposed.get_or_init(|| self.topology.transpose())
    }

    fn check_table(table: &PropertyTable, existing: &PropertyTable, expected_len: usize) -> Result<()> {
        for (name, column) in table.columns() {
            if existing.column(name).is_some() {
                return Err(Error::new(ErrorCode::AlreadyExists)
                    .with_context(format!("property `{name}` is already attached")));
            }
            if column.len() != expected_len {
                return Err(Error::new(ErrorCode::InvalidArgument).with_context(format!(
                    "property `{name}` has {} elements, expected {expected_len}",
                    column.len()
                )));
            }
        }
        Ok(())
    }

    /// Attaches every column of `table` as node properties.
    ///
    /// Fails without attaching anything when any name collides or any
    /// column length differs from the node count.
    pub fn add_node_properties(&mut self, table: PropertyTable, txn: &mut TxnContext) -> Result<()> {
        Self::check_table(&table, &self.node_table, self.num_nodes())?;
        for (name, column) in table.columns {
            txn.record_node_write(&name);
            self.node_table.columns.push((name, column));
        }
        Ok(())
    }

    /// Attaches every column of `table` as edge properties.
    pub fn add_edge_properties(&mut self, table: PropertyTable, txn: &mut TxnContext) -> Result<()> {
        Self::check_table(&table, &self.edge_table, self.num_edges())?;
        for (name, column) in table.columns {
            txn.record_edge_write(&name);
            self.edge_table.columns.push((name, column));
        }
        Ok(())
    }

    /// Looks up a node property column.
    pub fn node_property(&self, name: &str) -> Result<&ArrayRef> {
        self.node_table.column(name).ok_or_else(|| {
            Error::new(ErrorCode::PropertyNotFound)
                .with_context(format!("no node property `{name}`"))
        })
    }

    /// Looks up an edge property column.
    pub fn edge_property(&self, name: &str) -> Result<&ArrayRef> {
        self.edge_table.column(name).ok_or_else(|| {
            Error::new(ErrorCode::PropertyNotFound)
                .with_context(format!("no edge property `{name}`"))
        })
    }

    /// Returns the node property table.
    #[must_use]
    pub fn node_table(&self) -> &PropertyTable {
        &self.node_table
    }

    /// Returns the edge property table.
    #[must_use]
    pub fn edge_table(&self) -> &PropertyTable {
        &self.edge_table
    }

    /// Returns a mutable view over the node property table.
    pub fn node_mutable_property_view(&mut self) -> MutablePropertyView<'_> {
        MutablePropertyView {
            table: &mut self.node_table,
        }
    }

    /// Returns a mutable view over the edge property table.
    pub fn edge_mutable_property_view(&mut self) -> MutablePropertyView<'_> {
        MutablePropertyView {
            table: &mut self.edge_table,
        }
    }

    /// Returns a typed view of a node property.
    pub fn node_pod_view<P: ArrowPrimitiveType>(&self, name: &str) -> Result<PodPropertyView<'_, P>> {
        PodPropertyView::make(self.node_property(name)?.as_ref())
    }

    /// Returns a typed view of an edge property.
    pub fn edge_pod_view<P: ArrowPrimitiveType>(&self, name: &str) -> Result<PodPropertyView<'_, P>> {
        PodPropertyView::make(self.edge_property(name)?.as_ref())
    }

    /// Returns a typed fixed-size-list view of a node property.
    pub fn node_list_view<P: ArrowPrimitiveType>(
        &self,
        name: &str,
    ) -> Result<FixedSizeListView<'_, P>> {
        FixedSizeListView::make(self.node_property(name)?.as_ref())
    }

    /// Builds a shallow copy sharing the topology and carrying only the
    /// named properties. Fails with [`ErrorCode::PropertyNotFound`] when any
    /// name is missing.
    pub fn copy(&self, node_names: &[&str], edge_names: &[&str]) -> Result<Self> {
        let mut node_table = PropertyTable::new();
        for &name in node_names {
            node_table.add_column(name, Arc::clone(self.node_property(name)?))?;
        }
        let mut edge_table = PropertyTable::new();
        for &name in edge_names {
            edge_table.add_column(name, Arc::clone(self.edge_property(name)?))?;
        }
        Ok(Self {
            topology: Arc::clone(&self.topology),
            transposed: OnceLock::new(),
            node_table,
            edge_table,
        })
    }
}

/// Exclusive access to one property table, permitting removal.
pub struct MutablePropertyView<'a> {
    table: &'a mut PropertyTable,
}

impl MutablePropertyView<'_> {
    /// Detaches the named property.
    pub fn remove_property(&mut self, name: &str) -> Result<()> {
        self.table.remove_column(name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::topology::SymmetricGraphTopologyBuilder;
    use super::*;
    use arrow_array::{Float64Array, UInt32Array};
    use arrow_array::types::UInt32Type;

    fn small_graph() -> PropertyGraph {
        let mut builder = SymmetricGraphTopologyBuilder::new();
        builder.add_nodes(3);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        PropertyGraph::from_topology(builder.into_csr().expect("valid topology"))
    }

    fn rank_table(len: usize) -> PropertyTable {
        let mut table = PropertyTable::new();
        let values: Vec<u32> = (0..len as u32).collect();
        table
            .add_column("rank", Arc::new(UInt32Array::from(values)) as ArrayRef)
            .expect("fresh column");
        table
    }

    #[test]
    fn add_and_get_node_property() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        graph
            .add_node_properties(rank_table(3), &mut txn)
            .expect("table attaches");
        assert!(txn.node_properties_written().contains("rank"));
        let view = graph.node_pod_view::<UInt32Type>("rank").expect("typed view");
        assert_eq!(view.value(2), 2);
    }

    #[test]
    fn missing_property_is_reported() {
        let graph = small_graph();
        let err = graph.node_property("absent").expect_err("missing property");
        assert_eq!(err.code(), ErrorCode::PropertyNotFound);
    }

    #[test]
    fn name_collision_is_rejected() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        graph
            .add_node_properties(rank_table(3), &mut txn)
            .expect("first attach");
        let err = graph
            .add_node_properties(rank_table(3), &mut txn)
            .expect_err("duplicate name");
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        let err = graph
            .add_node_properties(rank_table(5), &mut txn)
            .expect_err("length mismatch");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn typed_view_rejects_wrong_element_type() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        let mut table = PropertyTable::new();
        table
            .add_column("score", Arc::new(Float64Array::from(vec![0.0; 3])) as ArrayRef)
            .expect("fresh column");
        graph.add_node_properties(table, &mut txn).expect("table attaches");
        let err = graph
            .node_pod_view::<UInt32Type>("score")
            .expect_err("type mismatch");
        assert_eq!(err.code(), ErrorCode::TypeError);
    }

    #[test]
    fn remove_property_through_mutable_view() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        graph
            .add_node_properties(rank_table(3), &mut txn)
            .expect("table attaches");
        graph
            .node_mutable_property_view()
            .remove_property("rank")
            .expect("property removed");
        assert_eq!(
            graph.node_property("rank").expect_err("gone").code(),
            ErrorCode::PropertyNotFound
        );
    }

    #[test]
    fn copy_shares_topology_and_selects_columns() {
        let mut graph = small_graph();
        let mut txn = TxnContext::new();
        graph
            .add_node_properties(rank_table(3), &mut txn)
            .expect("table attaches");
        let copy = graph.copy(&["rank"], &[]).expect("copy succeeds");
        assert_eq!(copy.num_nodes(), graph.num_nodes());
        assert!(copy.node_property("rank").is_ok());
        assert!(std::ptr::eq(copy.topology(), graph.topology()));
    }

    #[test]
    fn copy_with_unknown_property_fails() {
        let graph = small_graph();
        let err = graph.copy(&["absent"], &[]).expect_err("missing property");
        assert_eq!(err.code(), ErrorCode::PropertyNotFound);
    }
}
