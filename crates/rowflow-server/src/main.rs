//! rowflow standalone runner

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rowflow_core::engine::{Engine, EngineConfig, ExecutionMode, PrepareOptions, RunResult};
use rowflow_core::graph::{GraphBuilder, PipelineGraph, StageNode};
use rowflow_core::partition::{PartitionDistribution, PartitionSchema, StagePartitioning};
use rowflow_core::stage::{Discard, Passthrough, RowGenerator, StageRegistry};
use rowflow_core::CooperativeScheduler;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rowflow - runs a generator -> passthrough -> discard pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Rows to generate, or "unbounded"
    #[arg(long, default_value = "100000")]
    rows: String,

    /// Copies of the passthrough stage
    #[arg(long, default_value_t = 2)]
    copies: usize,

    /// Hash-partition the passthrough stage on "id" into this many
    /// partitions (overrides --copies)
    #[arg(long)]
    partitions: Option<usize>,

    /// Partition distribution file (JSON), used with --partitions
    #[arg(long)]
    distribution: Option<PathBuf>,

    /// Execution mode: threaded, serial or cooperative
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Channel capacity
    #[arg(long)]
    row_set_size: Option<usize>,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.execution_mode = mode;
    }
    if let Some(size) = args.row_set_size {
        config.row_set_size = size;
    }
    config.validate()?;
    Ok(config)
}

fn build_graph(args: &Args) -> Result<PipelineGraph> {
    let mut pass = StageNode::new("pass", Passthrough::TYPE)
        .with_copies(args.copies.max(1))
        .with_output_fields(RowGenerator::fields());
    if let Some(partitions) = args.partitions {
        let schema = PartitionSchema::with_count("by-id", partitions);
        pass = pass.with_partitioning(StagePartitioning::hash(schema, "id"));
    }

    let graph = GraphBuilder::new()
        .add(
            StageNode::new("generate", RowGenerator::TYPE)
                .with_property("rows", args.rows.as_str())
                .with_output_fields(RowGenerator::fields()),
        )
        .add(pass)
        .add(StageNode::new("discard", Discard::TYPE))
        .hop("generate", "pass")
        .hop("pass", "discard")
        .build()?;
    Ok(graph)
}

fn report(result: &RunResult) {
    for stage in &result.stages {
        info!(
            stage = %stage.name,
            copy = stage.copy,
            status = %stage.status,
            read = stage.counters.lines_read,
            written = stage.counters.lines_written,
            errors = stage.counters.errors,
            "stage summary"
        );
    }
    info!(
        status = %result.status,
        errors = result.errors,
        read = result.counters.lines_read,
        written = result.counters.lines_written,
        "run summary"
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rowflow={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rowflow");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let mut options = PrepareOptions::new();
    if let Some(path) = &args.distribution {
        let distribution = PartitionDistribution::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?;
        options = options.with_distribution(Arc::new(distribution));
    }
    let graph = build_graph(&args)?;
    let mode = config.execution_mode;
    let engine = Engine::new(config);
    let pipeline = engine.prepare(graph, &StageRegistry::with_builtins(), &options)?;

    let result = if mode == ExecutionMode::Cooperative {
        let mut scheduler = CooperativeScheduler::new(pipeline)?;
        scheduler.run()
    } else {
        let mut pipeline = pipeline;
        pipeline.start()?;
        pipeline.wait_until_finished();
        pipeline.result()
    };

    report(&result);
    if !result.is_success() {
        warn!("run did not complete successfully");
        bail!("run ended {} with {} errors", result.status, result.errors);
    }
    Ok(())
}
