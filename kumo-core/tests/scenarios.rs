//! End-to-end scenarios over the public API.

use std::sync::Arc;

use arrow_array::types::{Float64Type, UInt32Type};
use arrow_array::{ArrayRef, Float64Array, UInt32Array};

use kumo_core::analytics::{
    BFS_DISTANCE_INFINITY, BfsPlan, BfsStatistics, CdlpPlan, CdlpStatistics,
    IndependentSetPlan, IndependentSetStatistics, LocalClusteringCoefficientPlan,
    MatrixCompletionPlan, SsspPlan, SsspStatistics, StepFunctionKind, bfs, bfs_assert_valid,
    cdlp, independent_set, independent_set_assert_valid, local_clustering_coefficient,
    local_clustering_coefficient_assert_valid, matrix_completion, matrix_completion_rmse, sssp,
    sssp_assert_valid,
};
use kumo_core::{
    GraphTopologyBuilder, PropertyGraph, PropertyTable, SymmetricGraphTopologyBuilder,
    TxnContext, make_clique, make_grid,
};
use kumo_test_support::fixtures;
use kumo_test_support::tracing::RecordingLayer;
use tracing_subscriber::layer::SubscriberExt;

fn symmetric_graph(num_nodes: usize, edges: &[(u32, u32)]) -> PropertyGraph {
    let mut builder = SymmetricGraphTopologyBuilder::new();
    builder.add_nodes(num_nodes);
    for &(src, dst) in edges {
        builder.add_edge(src, dst);
    }
    PropertyGraph::from_topology(builder.into_csr().expect("valid topology"))
}

fn node_values_u32(graph: &PropertyGraph, name: &str) -> Vec<u32> {
    let view = graph.node_pod_view::<UInt32Type>(name).expect("typed view");
    graph.nodes().map(|n| view.value(n as usize)).collect()
}

#[test]
fn bfs_on_a_three_node_path() {
    let mut graph = symmetric_graph(3, &fixtures::path3_edges());
    let mut txn = TxnContext::new();
    bfs(&mut graph, 0, "distance", &mut txn, BfsPlan::default()).expect("bfs succeeds");

    assert_eq!(node_values_u32(&graph, "distance"), vec![0, 1, 2]);
    bfs_assert_valid(&graph, 0, "distance").expect("output is valid");
    let stats = BfsStatistics::compute(&graph, "distance").expect("statistics");
    assert_eq!(stats.n_reached_nodes, 3);
    assert!(!stats.to_string().is_empty());
    assert_ne!(node_values_u32(&graph, "distance")[0], BFS_DISTANCE_INFINITY);
}

#[test]
fn sssp_on_the_weighted_diamond() {
    let mut builder = GraphTopologyBuilder::new();
    builder.add_nodes(4);
    // Insertion order groups per source in the CSR, so the weight column
    // below lines up with edge ids.
    let mut weights = Vec::new();
    let mut edges = fixtures::diamond_weighted_edges();
    edges.sort_by_key(|&(src, _, _)| src);
    for &(src, dst, weight) in &edges {
        builder.add_edge(src, dst);
        weights.push(weight);
    }
    let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
    let mut table = PropertyTable::new();
    table
        .add_column("weight", Arc::new(UInt32Array::from(weights)) as ArrayRef)
        .expect("fresh column");
    let mut txn = TxnContext::new();
    graph.add_edge_properties(table, &mut txn).expect("weights attach");

    sssp(&mut graph, 0, "weight", "distance", &mut txn, SsspPlan::delta_step(2))
        .expect("sssp succeeds");
    assert_eq!(node_values_u32(&graph, "distance"), vec![0, 2, 5, 6]);
    sssp_assert_valid(&graph, 0, "weight", "distance").expect("output is valid");
    let stats = SsspStatistics::compute(&graph, "distance").expect("statistics");
    assert_eq!(stats.n_reached_nodes, 4);
}

#[test]
fn independent_set_on_the_four_clique() {
    let mut graph = make_clique(4).expect("valid clique");
    let mut txn = TxnContext::new();
    independent_set(&mut graph, "matched", &mut txn, IndependentSetPlan::default())
        .expect("independent set succeeds");
    independent_set_assert_valid(&graph, "matched").expect("output is valid");
    let stats = IndependentSetStatistics::compute(&graph, "matched").expect("statistics");
    assert_eq!(stats.cardinality, 1);
}

#[test]
fn clustering_coefficients_on_triangle_and_path() {
    let mut triangle = make_clique(3).expect("valid triangle");
    let mut txn = TxnContext::new();
    local_clustering_coefficient(
        &mut triangle,
        "lcc",
        &mut txn,
        LocalClusteringCoefficientPlan::default(),
    )
    .expect("lcc succeeds");
    let view = triangle.node_pod_view::<Float64Type>("lcc").expect("typed view");
    for node in triangle.nodes() {
        assert!((view.value(node as usize) - 1.0).abs() < f64::EPSILON);
    }
    local_clustering_coefficient_assert_valid(&triangle, "lcc").expect("output is valid");

    let mut path = symmetric_graph(3, &fixtures::path3_edges());
    local_clustering_coefficient(
        &mut path,
        "lcc",
        &mut txn,
        LocalClusteringCoefficientPlan::default(),
    )
    .expect("lcc succeeds");
    let view = path.node_pod_view::<Float64Type>("lcc").expect("typed view");
    for node in path.nodes() {
        assert_eq!(view.value(node as usize), 0.0);
    }
}

#[test]
fn cdlp_on_the_diagonal_grid() {
    let mut graph = make_grid(2, 2, true).expect("valid grid");
    assert_eq!(graph.num_nodes(), 4);
    let mut txn = TxnContext::new();
    cdlp(&mut graph, "community", 10, &mut txn, CdlpPlan::default()).expect("cdlp succeeds");
    let stats = CdlpStatistics::compute(&graph, "community").expect("statistics");
    assert_eq!(stats.total_communities, 1);
    assert_eq!(stats.largest_community_size, 4);
}

#[test]
fn sgd_recovers_the_identity_ratings() {
    let mut builder = GraphTopologyBuilder::new();
    builder.add_nodes(4);
    builder.add_edge(0, 2);
    builder.add_edge(0, 3);
    builder.add_edge(1, 2);
    builder.add_edge(1, 3);
    let mut graph = PropertyGraph::from_topology(builder.into_csr().expect("valid topology"));
    let mut table = PropertyTable::new();
    table
        .add_column(
            "rating",
            Arc::new(Float64Array::from(vec![1.0, 0.0, 0.0, 1.0])) as ArrayRef,
        )
        .expect("fresh column");
    let mut txn = TxnContext::new();
    graph.add_edge_properties(table, &mut txn).expect("ratings attach");

    let plan = MatrixCompletionPlan::sgd_by_items()
        .with_learning_rate(0.05)
        .with_lambda(0.01)
        .with_fixed_rounds(200)
        .with_init_seed(7)
        .with_step_function(StepFunctionKind::Bottou);
    matrix_completion(&mut graph, "rating", "latent", &mut txn, plan).expect("sgd succeeds");
    let rmse = matrix_completion_rmse(&graph, "rating", "latent").expect("rmse");
    assert!(rmse < 0.05, "rmse too high: {rmse}");
}

#[test]
fn analytics_emit_convergence_diagnostics() {
    let layer = RecordingLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    tracing::subscriber::with_default(subscriber, || {
        let mut graph = make_clique(4).expect("valid clique");
        let mut txn = TxnContext::new();
        independent_set(&mut graph, "matched", &mut txn, IndependentSetPlan::default())
            .expect("independent set succeeds");
    });
    assert!(layer.has_message("independent set priority converged"));
}
