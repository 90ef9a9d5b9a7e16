//! Command-line orchestration for the kumo analytics drivers.
//!
//! Each analytic is a subcommand over a shared edge-list input format
//! (`src dst [weight]` per line, `#` comments). Statistics and timings go
//! to stderr through `tracing`; stdout carries only the verification
//! decision line rendered by [`render_summary`].

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use kumo_core::analytics::{
    BfsPlan, BfsStatistics, CdlpPlan, CdlpStatistics, IndependentSetPlan,
    IndependentSetStatistics, KTrussPlan, KTrussStatistics, LocalClusteringCoefficientPlan,
    MatrixCompletionPlan, Relabeling, SsspPlan, SsspStatistics, StepFunctionKind, bfs,
    bfs_assert_valid, cdlp, cdlp_assert_valid, independent_set, independent_set_assert_valid,
    k_truss, k_truss_assert_valid, local_clustering_coefficient,
    local_clustering_coefficient_assert_valid, matrix_completion, matrix_completion_rmse, sssp,
    sssp_assert_valid,
};
use kumo_core::{
    GraphTopologyBuilder, Node, PropertyGenerator, PropertyGraph, TxnContext,
    add_edge_properties, set_active_threads,
};

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "kumo", about = "Run kumo graph analytics over an edge-list input.")]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands, one per analytic.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Breadth-first search distances.
    Bfs(BfsArgs),
    /// Single-source shortest paths.
    Sssp(SsspArgs),
    /// Maximal independent set.
    IndependentSet(IndependentSetArgs),
    /// Local clustering coefficients.
    Lcc(LccArgs),
    /// Community detection by label propagation.
    Cdlp(CdlpArgs),
    /// k-truss edge peeling.
    KTruss(KTrussArgs),
    /// Matrix completion by SGD.
    MatrixCompletion(MatrixCompletionArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Path to the edge-list input (`src dst [weight]` per line).
    pub input: PathBuf,

    /// Number of worker threads.
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Directory receiving the output column as `DIR/output`, one
    /// `<id> <value>` line per element.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Mirror every edge on load; required by the symmetric analytics.
    #[arg(long = "symmetric")]
    pub symmetric: bool,

    /// Name of the property attached to the graph.
    #[arg(long = "property", default_value = "output")]
    pub property: String,
}

/// BFS algorithm variants exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BfsVariant {
    /// Asynchronous at node granularity.
    Async,
    /// Asynchronous over edge tiles.
    AsyncTile,
    /// Level-synchronous at node granularity.
    Sync,
    /// Level-synchronous over edge tiles.
    SyncTile,
    /// Direction-optimising.
    DirectOpt,
}

/// Options accepted by the `bfs` command.
#[derive(Debug, Args, Clone)]
pub struct BfsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source node.
    #[arg(long = "start-node", default_value_t = 0)]
    pub start_node: Node,

    /// Algorithm variant.
    #[arg(long = "algorithm", value_enum, default_value_t = BfsVariant::DirectOpt)]
    pub algorithm: BfsVariant,

    /// Edges per tile for the tiled variants.
    #[arg(long = "edge-tile-size", default_value_t = BfsPlan::DEFAULT_EDGE_TILE_SIZE)]
    pub edge_tile_size: usize,

    /// Push-to-pull threshold divisor for direction optimisation.
    #[arg(long = "alpha", default_value_t = BfsPlan::DEFAULT_ALPHA)]
    pub alpha: u32,

    /// Pull-to-push threshold divisor for direction optimisation.
    #[arg(long = "beta", default_value_t = BfsPlan::DEFAULT_BETA)]
    pub beta: u32,
}

/// SSSP algorithm variants exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SsspVariant {
    /// Delta-stepping over edge tiles.
    DeltaTile,
    /// Delta-stepping over nodes.
    DeltaStep,
    /// Barrier delta-stepping.
    DeltaStepBarrier,
    /// Fused delta-stepping.
    DeltaStepFusion,
    /// Serial delta-stepping over edge tiles.
    SerialDeltaTile,
    /// Serial delta-stepping.
    SerialDelta,
    /// Dijkstra over edge tiles.
    DijkstraTile,
    /// Dijkstra.
    Dijkstra,
    /// Topological relaxation.
    Topological,
    /// Topological relaxation over edge tiles.
    TopologicalTile,
    /// Choose automatically from the degree distribution.
    Auto,
}

/// Options accepted by the `sssp` command.
#[derive(Debug, Args, Clone)]
pub struct SsspArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source node.
    #[arg(long = "start-node", default_value_t = 0)]
    pub start_node: Node,

    /// Algorithm variant.
    #[arg(long = "algorithm", value_enum, default_value_t = SsspVariant::Auto)]
    pub algorithm: SsspVariant,

    /// Bucket shift for the delta-stepping variants.
    #[arg(long = "delta", default_value_t = SsspPlan::DEFAULT_DELTA)]
    pub delta: u32,

    /// Edges per tile for the tiled variants.
    #[arg(long = "edge-tile-size", default_value_t = SsspPlan::DEFAULT_EDGE_TILE_SIZE)]
    pub edge_tile_size: usize,
}

/// Independent set algorithm variants exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IndependentSetVariant {
    /// Greedy serial scan.
    Serial,
    /// Phased pull.
    Pull,
    /// Priority rounds.
    Priority,
    /// Priority rounds over edge tiles.
    EdgeTiledPriority,
}

/// Options accepted by the `independent-set` command.
#[derive(Debug, Args, Clone)]
pub struct IndependentSetArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Algorithm variant.
    #[arg(long = "algorithm", value_enum, default_value_t = IndependentSetVariant::Priority)]
    pub algorithm: IndependentSetVariant,
}

/// Clustering coefficient variants exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LccVariant {
    /// Shared atomic counters.
    Atomics,
    /// Per-worker counter slabs.
    PerThread,
}

/// Relabeling policies exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RelabelVariant {
    /// Keep node ids.
    No,
    /// Relabel by decreasing degree.
    Yes,
    /// Decide from the degree distribution.
    Auto,
}

/// Options accepted by the `lcc` command.
#[derive(Debug, Args, Clone)]
pub struct LccArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Algorithm variant.
    #[arg(long = "algorithm", value_enum, default_value_t = LccVariant::Atomics)]
    pub algorithm: LccVariant,

    /// Relabeling policy.
    #[arg(long = "relabel", value_enum, default_value_t = RelabelVariant::Auto)]
    pub relabel: RelabelVariant,
}

/// Options accepted by the `cdlp` command.
#[derive(Debug, Args, Clone)]
pub struct CdlpArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Iteration budget.
    #[arg(long = "max-iterations", default_value_t = 10)]
    pub max_iterations: usize,
}

/// Options accepted by the `k-truss` command.
#[derive(Debug, Args, Clone)]
pub struct KTrussArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The truss number `k`.
    #[arg(long = "k")]
    pub k: u32,
}

/// Step-size schedules exposed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StepVariant {
    /// Adaptive bold driver.
    Bold,
    /// Bottou schedule.
    Bottou,
    /// Intel schedule.
    Intel,
    /// Inverse schedule.
    Inverse,
    /// Purdue schedule.
    Purdue,
}

/// Options accepted by the `matrix-completion` command.
#[derive(Debug, Args, Clone)]
pub struct MatrixCompletionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Learning rate.
    #[arg(long = "learning-rate", default_value_t = MatrixCompletionPlan::DEFAULT_LEARNING_RATE)]
    pub learning_rate: f64,

    /// Regularisation strength.
    #[arg(long = "lambda", default_value_t = MatrixCompletionPlan::DEFAULT_LAMBDA)]
    pub lambda: f64,

    /// Relative-improvement stopping tolerance.
    #[arg(long = "tolerance", default_value_t = MatrixCompletionPlan::DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Run exactly this many rounds instead of converging.
    #[arg(long = "fixed-rounds", default_value_t = 0)]
    pub fixed_rounds: u32,

    /// Step-size schedule.
    #[arg(long = "step", value_enum, default_value_t = StepVariant::Bold)]
    pub step: StepVariant,

    /// Seed for reproducible per-node initialisation.
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Reading the input failed.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The input edge list is malformed.
    #[error("invalid edge list `{path}` line {line}: {message}")]
    Parse {
        /// The offending path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// The command needs edge weights but the input has none.
    #[error("input `{path}` carries no edge weights")]
    MissingWeights {
        /// The offending path.
        path: PathBuf,
    },
    /// The analytics core reported a failure.
    #[error(transparent)]
    Core(#[from] kumo_core::Error),
}

/// The outcome of one CLI run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Name of the executed analytic.
    pub algorithm: &'static str,
    /// Whether the validation predicate accepted the output.
    pub verified: bool,
    /// Rendered statistics, as also logged to stderr.
    pub statistics: String,
}

#[derive(Debug)]
struct LoadedGraph {
    graph: PropertyGraph,
    /// CSR edge id to input weight, when the input carried weights.
    csr_weights: Option<Vec<f64>>,
    input: PathBuf,
}

fn parse_line(raw: &str) -> Result<Option<(u32, u32, Option<f64>)>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut fields = trimmed.split_whitespace();
    let src = fields
        .next()
        .ok_or("missing source id")?
        .parse::<u32>()
        .map_err(|err| format!("bad source id: {err}"))?;
    let dst = fields
        .next()
        .ok_or("missing destination id")?
        .parse::<u32>()
        .map_err(|err| format!("bad destination id: {err}"))?;
    let weight = fields
        .next()
        .map(|field| field.parse::<f64>().map_err(|err| format!("bad weight: {err}")))
        .transpose()?;
    if fields.next().is_some() {
        return Err("too many fields".into());
    }
    Ok(Some((src, dst, weight)))
}

fn load_graph(common: &CommonArgs) -> Result<LoadedGraph, CliError> {
    let text = fs::read_to_string(&common.input).map_err(|source| CliError::Io {
        path: common.input.clone(),
        source,
    })?;

    let mut edges: Vec<(u32, u32)> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();
    let mut max_node = None::<u32>;
    for (index, raw) in text.lines().enumerate() {
        let parsed = parse_line(raw).map_err(|message| CliError::Parse {
            path: common.input.clone(),
            line: index + 1,
            message,
        })?;
        let Some((src, dst, weight)) = parsed else {
            continue;
        };
        let consistent = match weight {
            Some(weight) if weights.len() == edges.len() => {
                weights.push(weight);
                true
            }
            None => weights.is_empty(),
            Some(_) => false,
        };
        if !consistent {
            return Err(CliError::Parse {
                path: common.input.clone(),
                line: index + 1,
                message: "either every edge or no edge may carry a weight".into(),
            });
        }
        edges.push((src, dst));
        max_node = Some(max_node.map_or(src.max(dst), |prior| prior.max(src).max(dst)));
    }

    let has_weights = !weights.is_empty();
    if common.symmetric {
        let originals = edges.len();
        for index in 0..originals {
            let (src, dst) = edges[index];
            edges.push((dst, src));
            if has_weights {
                let weight = weights[index];
                weights.push(weight);
            }
        }
    }

    let mut builder = GraphTopologyBuilder::new();
    builder.add_nodes(max_node.map_or(0, |max| max as usize + 1));
    for &(src, dst) in &edges {
        builder.add_edge(src, dst);
    }
    let (topology, mapping) = builder.into_csr_with_mapping()?;
    let csr_weights = has_weights.then(|| {
        mapping.iter().map(|&insertion| weights[insertion]).collect::<Vec<f64>>()
    });

    Ok(LoadedGraph {
        graph: PropertyGraph::from_topology(topology),
        csr_weights,
        input: common.input.clone(),
    })
}

/// Attaches the loaded weights, as `UInt32` when they are all integral and
/// `as_float` is not requested, otherwise as `Float64`.
fn attach_weights(
    loaded: &mut LoadedGraph,
    txn: &mut TxnContext,
    name: &str,
    as_float: bool,
) -> Result<bool, CliError> {
    let Some(weights) = loaded.csr_weights.clone() else {
        return Err(CliError::MissingWeights {
            path: loaded.input.clone(),
        });
    };
    let integral = !as_float
        && weights
            .iter()
            .all(|&weight| weight >= 0.0 && weight.fract() == 0.0 && weight <= f64::from(u32::MAX));
    if integral {
        let generator =
            PropertyGenerator::new(name, move |id: u64| weights[id as usize] as u32);
        add_edge_properties(&mut loaded.graph, txn, &[&generator])?;
    } else {
        let generator = PropertyGenerator::new(name, move |id: u64| weights[id as usize]);
        add_edge_properties(&mut loaded.graph, txn, &[&generator])?;
    }
    Ok(integral)
}

fn apply_threads(common: &CommonArgs) {
    if let Some(threads) = common.threads {
        let granted = set_active_threads(threads);
        tracing::info!(requested = threads, granted, "sized worker pool");
    }
}

fn write_output(common: &CommonArgs, lines: &[String]) -> Result<(), CliError> {
    let Some(directory) = &common.output else {
        return Ok(());
    };
    fs::create_dir_all(directory).map_err(|source| CliError::Io {
        path: directory.clone(),
        source,
    })?;
    let path = directory.join("output");
    fs::write(&path, lines.join("\n") + "\n").map_err(|source| CliError::Io {
        path,
        source,
    })?;
    Ok(())
}

fn node_lines<T: std::fmt::Display>(values: impl IntoIterator<Item = T>) -> Vec<String> {
    values
        .into_iter()
        .enumerate()
        .map(|(id, value)| format!("{id} {value}"))
        .collect()
}

fn run_bfs(args: &BfsArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();
    let plan = match args.algorithm {
        BfsVariant::Async => BfsPlan::asynchronous(),
        BfsVariant::AsyncTile => BfsPlan::asynchronous_tile(args.edge_tile_size),
        BfsVariant::Sync => BfsPlan::synchronous(),
        BfsVariant::SyncTile => BfsPlan::synchronous_tile(args.edge_tile_size),
        BfsVariant::DirectOpt => BfsPlan::synchronous_direct_opt(args.alpha, args.beta),
    };

    let started = Instant::now();
    bfs(&mut loaded.graph, args.start_node, &args.common.property, &mut txn, plan)?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "bfs finished");

    let verified =
        bfs_assert_valid(&loaded.graph, args.start_node, &args.common.property).is_ok();
    let statistics = BfsStatistics::compute(&loaded.graph, &args.common.property)?;
    tracing::info!(target: "kumo::stats", "\n{statistics}");

    let view = loaded
        .graph
        .node_pod_view::<arrow_types::UInt32Type>(&args.common.property)?;
    write_output(&args.common, &node_lines(view.values().iter().copied()))?;

    Ok(RunSummary {
        algorithm: "bfs",
        verified,
        statistics: statistics.to_string(),
    })
}

fn run_sssp(args: &SsspArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();
    let integral = attach_weights(&mut loaded, &mut txn, "weight", false)?;
    let plan = match args.algorithm {
        SsspVariant::DeltaTile => SsspPlan::delta_tile(args.delta, args.edge_tile_size),
        SsspVariant::DeltaStep => SsspPlan::delta_step(args.delta),
        SsspVariant::DeltaStepBarrier => SsspPlan::delta_step_barrier(args.delta),
        SsspVariant::DeltaStepFusion => SsspPlan::delta_step_fusion(args.delta),
        SsspVariant::SerialDeltaTile => {
            SsspPlan::serial_delta_tile(args.delta, args.edge_tile_size)
        }
        SsspVariant::SerialDelta => SsspPlan::serial_delta(args.delta),
        SsspVariant::DijkstraTile => SsspPlan::dijkstra_tile(args.edge_tile_size),
        SsspVariant::Dijkstra => SsspPlan::dijkstra(),
        SsspVariant::Topological => SsspPlan::topological(),
        SsspVariant::TopologicalTile => SsspPlan::topological_tile(args.edge_tile_size),
        SsspVariant::Auto => SsspPlan::automatic(),
    };

    let started = Instant::now();
    sssp(
        &mut loaded.graph,
        args.start_node,
        "weight",
        &args.common.property,
        &mut txn,
        plan,
    )?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "sssp finished");

    let verified =
        sssp_assert_valid(&loaded.graph, args.start_node, "weight", &args.common.property)
            .is_ok();
    let statistics = SsspStatistics::compute(&loaded.graph, &args.common.property)?;
    tracing::info!(target: "kumo::stats", "\n{statistics}");

    let lines = if integral {
        let view = loaded
            .graph
            .node_pod_view::<arrow_types::UInt32Type>(&args.common.property)?;
        node_lines(view.values().iter().copied())
    } else {
        let view = loaded
            .graph
            .node_pod_view::<arrow_types::Float64Type>(&args.common.property)?;
        node_lines(view.values().iter().copied())
    };
    write_output(&args.common, &lines)?;

    Ok(RunSummary {
        algorithm: "sssp",
        verified,
        statistics: statistics.to_string(),
    })
}

fn run_independent_set(args: &IndependentSetArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();
    let plan = match args.algorithm {
        IndependentSetVariant::Serial => IndependentSetPlan::serial(),
        IndependentSetVariant::Pull => IndependentSetPlan::pull(),
        IndependentSetVariant::Priority => IndependentSetPlan::priority(),
        IndependentSetVariant::EdgeTiledPriority => IndependentSetPlan::edge_tiled_priority(),
    };

    let started = Instant::now();
    independent_set(&mut loaded.graph, &args.common.property, &mut txn, plan)?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "independent set finished"
    );

    let verified = independent_set_assert_valid(&loaded.graph, &args.common.property).is_ok();
    let statistics = IndependentSetStatistics::compute(&loaded.graph, &args.common.property)?;
    tracing::info!(target: "kumo::stats", "\n{statistics}");

    let view = loaded
        .graph
        .node_pod_view::<arrow_types::UInt8Type>(&args.common.property)?;
    write_output(&args.common, &node_lines(view.values().iter().copied()))?;

    Ok(RunSummary {
        algorithm: "independent-set",
        verified,
        statistics: statistics.to_string(),
    })
}

fn run_lcc(args: &LccArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();
    let relabeling = match args.relabel {
        RelabelVariant::No => Relabeling::NoRelabel,
        RelabelVariant::Yes => Relabeling::Relabel,
        RelabelVariant::Auto => Relabeling::AutoRelabel,
    };
    let plan = match args.algorithm {
        LccVariant::Atomics => {
            LocalClusteringCoefficientPlan::ordered_count_atomics(relabeling, false)
        }
        LccVariant::PerThread => {
            LocalClusteringCoefficientPlan::ordered_count_per_thread(relabeling, false)
        }
    };

    let started = Instant::now();
    local_clustering_coefficient(&mut loaded.graph, &args.common.property, &mut txn, plan)?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "lcc finished");

    let verified =
        local_clustering_coefficient_assert_valid(&loaded.graph, &args.common.property).is_ok();
    let view = loaded
        .graph
        .node_pod_view::<arrow_types::Float64Type>(&args.common.property)?;
    write_output(&args.common, &node_lines(view.values().iter().copied()))?;

    Ok(RunSummary {
        algorithm: "lcc",
        verified,
        statistics: String::new(),
    })
}

fn run_cdlp(args: &CdlpArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();

    let started = Instant::now();
    cdlp(
        &mut loaded.graph,
        &args.common.property,
        args.max_iterations,
        &mut txn,
        CdlpPlan::default(),
    )?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "cdlp finished");

    let verified = cdlp_assert_valid(&loaded.graph, &args.common.property).is_ok();
    let statistics = CdlpStatistics::compute(&loaded.graph, &args.common.property)?;
    tracing::info!(target: "kumo::stats", "\n{statistics}");

    let view = loaded
        .graph
        .node_pod_view::<arrow_types::UInt64Type>(&args.common.property)?;
    write_output(&args.common, &node_lines(view.values().iter().copied()))?;

    Ok(RunSummary {
        algorithm: "cdlp",
        verified,
        statistics: statistics.to_string(),
    })
}

fn run_k_truss(args: &KTrussArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();

    let started = Instant::now();
    k_truss(
        &mut loaded.graph,
        args.k,
        &args.common.property,
        &mut txn,
        KTrussPlan::default(),
    )?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "k-truss finished");

    let verified = k_truss_assert_valid(&loaded.graph, args.k, &args.common.property).is_ok();
    let statistics = KTrussStatistics::compute(&loaded.graph, &args.common.property)?;
    tracing::info!(target: "kumo::stats", "\n{statistics}");

    let view = loaded
        .graph
        .edge_pod_view::<arrow_types::UInt8Type>(&args.common.property)?;
    write_output(&args.common, &node_lines(view.values().iter().copied()))?;

    Ok(RunSummary {
        algorithm: "k-truss",
        verified,
        statistics: statistics.to_string(),
    })
}

fn run_matrix_completion(args: &MatrixCompletionArgs) -> Result<RunSummary, CliError> {
    apply_threads(&args.common);
    let mut loaded = load_graph(&args.common)?;
    let mut txn = TxnContext::new();
    attach_weights(&mut loaded, &mut txn, "rating", true)?;

    let mut plan = MatrixCompletionPlan::sgd_by_items()
        .with_learning_rate(args.learning_rate)
        .with_lambda(args.lambda)
        .with_tolerance(args.tolerance)
        .with_fixed_rounds(args.fixed_rounds)
        .with_step_function(match args.step {
            StepVariant::Bold => StepFunctionKind::Bold,
            StepVariant::Bottou => StepFunctionKind::Bottou,
            StepVariant::Intel => StepFunctionKind::Intel,
            StepVariant::Inverse => StepFunctionKind::Inverse,
            StepVariant::Purdue => StepFunctionKind::Purdue,
        });
    if let Some(seed) = args.seed {
        plan = plan.with_init_seed(seed);
    }

    let started = Instant::now();
    matrix_completion(&mut loaded.graph, "rating", &args.common.property, &mut txn, plan)?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "matrix completion finished"
    );

    let rmse = matrix_completion_rmse(&loaded.graph, "rating", &args.common.property)?;
    tracing::info!(target: "kumo::stats", rmse, "matrix completion error");

    let latent = loaded
        .graph
        .node_list_view::<arrow_types::Float64Type>(&args.common.property)?;
    let lines: Vec<String> = (0..latent.len())
        .map(|node| {
            let rendered: Vec<String> =
                latent.value(node).iter().map(ToString::to_string).collect();
            format!("{node} {}", rendered.join(" "))
        })
        .collect();
    write_output(&args.common, &lines)?;

    Ok(RunSummary {
        algorithm: "matrix-completion",
        verified: rmse.is_finite(),
        statistics: format!("RMSE = {rmse}"),
    })
}

/// Executes the parsed command.
pub fn run_cli(cli: &Cli) -> Result<RunSummary, CliError> {
    match &cli.command {
        Command::Bfs(args) => run_bfs(args),
        Command::Sssp(args) => run_sssp(args),
        Command::IndependentSet(args) => run_independent_set(args),
        Command::Lcc(args) => run_lcc(args),
        Command::Cdlp(args) => run_cdlp(args),
        Command::KTruss(args) => run_k_truss(args),
        Command::MatrixCompletion(args) => run_matrix_completion(args),
    }
}

/// Writes the verification decision line to `writer`.
///
/// # Errors
/// Propagates I/O failures from `writer`.
pub fn render_summary(summary: &RunSummary, writer: &mut impl Write) -> io::Result<()> {
    if summary.verified {
        writeln!(writer, "Verification successful")
    } else {
        writeln!(writer, "Verification failed")
    }
}

/// The Arrow types the handlers read output columns with.
mod arrow_types {
    pub(crate) use arrow_array::types::{Float64Type, UInt8Type, UInt32Type, UInt64Type};
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumo_test_support::fixtures;
    use rstest::rstest;
    use std::path::Path;

    fn write_input(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("graph.el");
        fs::write(&path, contents).expect("fixture written");
        path
    }

    fn common_for(input: PathBuf, symmetric: bool) -> CommonArgs {
        CommonArgs {
            input,
            threads: None,
            output: None,
            symmetric,
            property: "output".into(),
        }
    }

    #[test]
    fn edge_list_lines_parse() {
        assert_eq!(parse_line("1 2").expect("valid"), Some((1, 2, None)));
        assert_eq!(parse_line("1 2 0.5").expect("valid"), Some((1, 2, Some(0.5))));
        assert_eq!(parse_line("# comment").expect("valid"), None);
        assert_eq!(parse_line("   ").expect("valid"), None);
        assert!(parse_line("1").is_err());
        assert!(parse_line("1 2 3 4").is_err());
        assert!(parse_line("a b").is_err());
    }

    #[test]
    fn loader_builds_a_symmetric_graph() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(
            dir.path(),
            &fixtures::render_edge_list(&fixtures::path3_edges()),
        );
        let loaded = load_graph(&common_for(input, true)).expect("graph loads");
        assert_eq!(loaded.graph.num_nodes(), 3);
        assert_eq!(loaded.graph.num_edges(), 4);
        assert!(loaded.graph.topology().is_symmetric());
        assert!(loaded.csr_weights.is_none());
    }

    #[test]
    fn loader_rejects_mixed_weights() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(dir.path(), "0 1 2.5\n1 2\n");
        let err = load_graph(&common_for(input, false)).expect_err("mixed weights");
        assert!(matches!(err, CliError::Parse { line: 2, .. }));
    }

    #[rstest]
    #[case::bfs(BfsVariant::Sync)]
    #[case::direct_opt(BfsVariant::DirectOpt)]
    fn bfs_command_writes_distances(#[case] algorithm: BfsVariant) {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(
            dir.path(),
            &fixtures::render_edge_list(&fixtures::path3_edges()),
        );
        let out_dir = dir.path().join("out");
        let mut common = common_for(input, true);
        common.output = Some(out_dir.clone());
        let args = BfsArgs {
            common,
            start_node: 0,
            algorithm,
            edge_tile_size: BfsPlan::DEFAULT_EDGE_TILE_SIZE,
            alpha: BfsPlan::DEFAULT_ALPHA,
            beta: BfsPlan::DEFAULT_BETA,
        };
        let summary = run_bfs(&args).expect("bfs runs");
        assert!(summary.verified);
        let written = fs::read_to_string(out_dir.join("output")).expect("output written");
        assert_eq!(written, "0 0\n1 1\n2 2\n");
    }

    #[test]
    fn sssp_command_matches_the_scenario() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(
            dir.path(),
            &fixtures::render_weighted_edge_list(&fixtures::diamond_weighted_edges()),
        );
        let out_dir = dir.path().join("out");
        let mut common = common_for(input, false);
        common.output = Some(out_dir.clone());
        let args = SsspArgs {
            common,
            start_node: 0,
            algorithm: SsspVariant::Dijkstra,
            delta: SsspPlan::DEFAULT_DELTA,
            edge_tile_size: SsspPlan::DEFAULT_EDGE_TILE_SIZE,
        };
        let summary = run_sssp(&args).expect("sssp runs");
        assert!(summary.verified);
        let written = fs::read_to_string(out_dir.join("output")).expect("output written");
        assert_eq!(written, "0 0\n1 2\n2 5\n3 6\n");
    }

    #[test]
    fn independent_set_command_verifies() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(
            dir.path(),
            &fixtures::render_edge_list(&fixtures::k4_edges()),
        );
        let args = IndependentSetArgs {
            common: common_for(input, true),
            algorithm: IndependentSetVariant::Priority,
        };
        let summary = run_independent_set(&args).expect("independent set runs");
        assert!(summary.verified);
        assert!(summary.statistics.contains("Cardinality = 1"));
    }

    #[test]
    fn missing_weights_are_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = write_input(
            dir.path(),
            &fixtures::render_edge_list(&fixtures::path3_edges()),
        );
        let args = SsspArgs {
            common: common_for(input, false),
            start_node: 0,
            algorithm: SsspVariant::Dijkstra,
            delta: SsspPlan::DEFAULT_DELTA,
            edge_tile_size: SsspPlan::DEFAULT_EDGE_TILE_SIZE,
        };
        let err = run_sssp(&args).expect_err("no weights");
        assert!(matches!(err, CliError::MissingWeights { .. }));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "kumo",
            "bfs",
            "graph.el",
            "--start-node",
            "3",
            "--algorithm",
            "sync",
            "-t",
            "2",
        ])
        .expect("arguments parse");
        match cli.command {
            Command::Bfs(args) => {
                assert_eq!(args.start_node, 3);
                assert_eq!(args.common.threads, Some(2));
            }
            _ => panic!("expected the bfs subcommand"),
        }
    }

    #[test]
    fn render_summary_writes_the_decision_line() {
        let summary = RunSummary {
            algorithm: "bfs",
            verified: true,
            statistics: String::new(),
        };
        let mut buffer = Vec::new();
        render_summary(&summary, &mut buffer).expect("write succeeds");
        assert_eq!(String::from_utf8(buffer).expect("utf8"), "Verification successful\n");
    }
}
