//! Scenario tests for prepared and running pipelines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::*;
use crate::graph::{ErrorHandling, GraphBuilder, PipelineGraph, StageNode};
use crate::partition::{
    DistributionEntry, HashPartitioner, PartitionDistribution, PartitionSchema, StagePartitioning,
};
use crate::row::{Row, RowMeta, Value, ValueType};
use crate::stage::{
    Discard, Passthrough, ProcessOutcome, RejectFilter, RowGenerator, RowListener, Stage,
    StageContext, StageError, StageRegistry, StageSnapshot, StageStatus,
};

const WAIT: Duration = Duration::from_secs(10);

fn engine(mode: ExecutionMode) -> Engine {
    Engine::new(
        EngineConfig::builder()
            .execution_mode(mode)
            .poll_interval(Duration::from_millis(5))
            .build(),
    )
}

fn generator(name: &str, rows: &str) -> StageNode {
    StageNode::new(name, RowGenerator::TYPE)
        .with_property("rows", rows)
        .with_output_fields(RowGenerator::fields())
}

fn linear_graph(rows: &str, pass_copies: usize) -> PipelineGraph {
    GraphBuilder::new()
        .add(generator("gen", rows))
        .add(StageNode::new("pass", Passthrough::TYPE).with_copies(pass_copies))
        .add(StageNode::new("sink", Discard::TYPE))
        .hop("gen", "pass")
        .hop("pass", "sink")
        .build()
        .unwrap()
}

fn run(pipeline: &mut Pipeline) -> RunResult {
    pipeline.start().unwrap();
    assert!(pipeline.wait_until_finished_timeout(WAIT), "run did not finish");
    pipeline.result()
}

// ---- Test stages ----

/// Counts lifecycle calls across all copies of a test stage.
#[derive(Debug, Default)]
struct Probe {
    inits: AtomicUsize,
    processed: AtomicUsize,
    disposed: AtomicUsize,
}

/// Passthrough that reports to a probe and can fail on purpose.
struct Probed {
    probe: Arc<Probe>,
    fail_init: bool,
    fail_after: Option<usize>,
    seen: usize,
}

impl Stage for Probed {
    fn init(&mut self, _ctx: &mut StageContext) -> Result<(), StageError> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(StageError::failed("cannot open lookup"));
        }
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        self.probe.processed.fetch_add(1, Ordering::SeqCst);
        let Some(row) = ctx.get_row() else {
            return Ok(ctx.outcome_when_idle());
        };
        self.seen += 1;
        if self.fail_after.is_some_and(|n| self.seen > n) {
            return Err(StageError::failed("bad row"));
        }
        ctx.put_row(row)?;
        Ok(ProcessOutcome::Continue)
    }

    fn dispose(&mut self, _ctx: &mut StageContext) {
        self.probe.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn supports_cooperative(&self) -> bool {
        true
    }
}

fn probed_registry(probe: &Arc<Probe>) -> StageRegistry {
    let mut registry = StageRegistry::with_builtins();
    let shared = Arc::clone(probe);
    registry.register_fn("probed", move |node: &StageNode, copy: usize| {
        let fail_init = node
            .property("fail_init_copy")
            .and_then(|c| c.parse::<usize>().ok())
            == Some(copy);
        let fail_after = node.property("fail_after").and_then(|n| n.parse().ok());
        Ok::<Box<dyn Stage>, StageError>(Box::new(Probed {
            probe: Arc::clone(&shared),
            fail_init,
            fail_after,
            seen: 0,
        }))
    });
    registry
}

/// Writes every input row `times` times.
struct Repeat {
    times: usize,
}

impl Stage for Repeat {
    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        let Some(row) = ctx.get_row() else {
            return Ok(ctx.outcome_when_idle());
        };
        for _ in 0..self.times {
            ctx.put_row(row.clone())?;
        }
        Ok(ProcessOutcome::Continue)
    }
}

/// Never reads its input.
struct Stall;

impl Stage for Stall {
    fn process_row(&mut self, _ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        thread::sleep(Duration::from_millis(1));
        Ok(ProcessOutcome::Continue)
    }
}

#[derive(Default)]
struct RecordIds(Mutex<Vec<i64>>);

impl RowListener for RecordIds {
    fn on_row_read(&self, row: &Row) {
        if let Some(id) = row.get(0).and_then(Value::as_integer) {
            self.0.lock().push(id);
        }
    }
}

#[derive(Default)]
struct CountEvents {
    started: AtomicUsize,
    stages: AtomicUsize,
    all: AtomicUsize,
}

impl PipelineListener for CountEvents {
    fn on_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stage_completed(&self, _stage: &StageSnapshot) {
        self.stages.fetch_add(1, Ordering::SeqCst);
    }

    fn on_all_completed(&self, _result: &RunResult) {
        self.all.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- Runs ----

#[test]
fn test_threaded_run_moves_every_row() {
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("1000", 2), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    assert_eq!(pipeline.handles().len(), 4);
    assert_eq!(pipeline.channels().len(), 4);

    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.status, RunPhase::Finished);
    assert_eq!(result.stage_counters("gen").lines_written, 1000);
    assert_eq!(result.stage_counters("pass").lines_read, 1000);
    assert_eq!(result.stage_counters("pass").lines_written, 1000);
    assert_eq!(result.stage_counters("sink").lines_read, 1000);
    assert_eq!(result.stage_counters("sink").lines_output, 1000);
    assert!(result.stages.iter().all(|s| s.status == StageStatus::Finished));
    assert!(pipeline.is_finished());
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.errors(), 0);
    assert_eq!(pipeline.aggregate_counters(), result.counters);
}

#[test]
fn test_serial_run_moves_every_row() {
    let mut pipeline = engine(ExecutionMode::Serial)
        .prepare(linear_graph("250", 1), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("sink").lines_read, 250);
}

#[test]
fn test_serial_fan_in_from_two_copies() {
    let graph = GraphBuilder::new()
        .add(generator("gen", "10").with_copies(2))
        .add(StageNode::new("sink", Discard::TYPE))
        .hop("gen", "sink")
        .build()
        .unwrap();
    let mut pipeline = engine(ExecutionMode::Serial)
        .prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("gen").lines_written, 20);
    assert_eq!(result.stage_counters("sink").lines_read, 20);
    assert!(result.stages.iter().all(|s| s.status == StageStatus::Finished));
}

#[test]
fn test_serial_fan_out_and_fan_in() {
    let mut pipeline = engine(ExecutionMode::Serial)
        .prepare(linear_graph("300", 3), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage("pass").count(), 3);
    assert_eq!(result.stage_counters("pass").lines_read, 300);
    assert_eq!(result.stage_counters("sink").lines_read, 300);
}

#[test]
fn test_serial_stage_writing_several_rows_per_call() {
    let mut registry = StageRegistry::with_builtins();
    registry.register_fn("repeat", |_node: &StageNode, _copy: usize| {
        Ok::<Box<dyn Stage>, StageError>(Box::new(Repeat { times: 4 }))
    });
    let graph = GraphBuilder::new()
        .add(generator("gen", "25"))
        .add(StageNode::new("repeat", "repeat").with_output_fields(RowGenerator::fields()))
        .add(StageNode::new("sink", Discard::TYPE))
        .hop("gen", "repeat")
        .hop("repeat", "sink")
        .build()
        .unwrap();
    let mut pipeline = engine(ExecutionMode::Serial)
        .prepare(graph, &registry, &PrepareOptions::default())
        .unwrap();
    let ids = Arc::new(RecordIds::default());
    pipeline
        .add_row_listener("sink", 0, Arc::clone(&ids) as Arc<dyn RowListener>)
        .unwrap();

    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("repeat").lines_written, 100);
    assert_eq!(result.stage_counters("sink").lines_read, 100);
    let expected: Vec<i64> = (0..25).flat_map(|id| [id; 4]).collect();
    assert_eq!(*ids.0.lock(), expected);
}

/// Runs `source -> filter (2 hash partitions on id) -> sink` once and
/// returns the filter copy that read each id.
fn filter_copy_by_id() -> FxHashMap<i64, usize> {
    let schema = PartitionSchema::with_count("by-id", 2);
    let graph = GraphBuilder::new()
        .add(generator("source", "200"))
        .add(
            StageNode::new("filter", Passthrough::TYPE)
                .with_partitioning(StagePartitioning::hash(schema, "id")),
        )
        .add(StageNode::new("sink", Discard::TYPE).with_copies(2))
        .hop("source", "filter")
        .hop("filter", "sink")
        .build()
        .unwrap();

    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    let seen = [Arc::new(RecordIds::default()), Arc::new(RecordIds::default())];
    for (copy, listener) in seen.iter().enumerate() {
        pipeline
            .add_row_listener("filter", copy, Arc::clone(listener) as Arc<dyn RowListener>)
            .unwrap();
    }

    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("sink").lines_read, 200);

    let mut copy_of = FxHashMap::default();
    for (copy, listener) in seen.iter().enumerate() {
        for id in listener.0.lock().iter() {
            assert!(copy_of.insert(*id, copy).is_none(), "id {id} read twice");
        }
    }
    copy_of
}

#[test]
fn test_hash_partitioned_routing_is_stable() {
    let first = filter_copy_by_id();
    assert_eq!(first.len(), 200);
    for (id, copy) in &first {
        let expected = HashPartitioner::hash_partition(&Value::Integer(*id), 2).unwrap();
        assert_eq!(expected, *copy, "id {id} reached filter copy {copy}");
    }

    let second = filter_copy_by_id();
    assert_eq!(first, second);
    for id in 1..=4 {
        assert_eq!(first[&id], second[&id]);
    }
}

#[test]
fn test_distribution_limits_local_copies() {
    let schema = PartitionSchema::with_count("by-id", 2);
    let graph = GraphBuilder::new()
        .add(generator("source", "50"))
        .add(
            StageNode::new("filter", Passthrough::TYPE)
                .with_partitioning(StagePartitioning::hash(schema, "id")),
        )
        .hop("source", "filter")
        .build()
        .unwrap();
    let distribution = PartitionDistribution::new(vec![
        DistributionEntry {
            host: DEFAULT_HOST.to_string(),
            stage: "filter".to_string(),
            copy: 0,
            partition: 1,
        },
        DistributionEntry {
            host: "elsewhere".to_string(),
            stage: "filter".to_string(),
            copy: 0,
            partition: 0,
        },
    ]);
    let options = PrepareOptions::new().with_distribution(Arc::new(distribution));
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), &options)
        .unwrap();
    assert_eq!(pipeline.handles().iter().filter(|h| h.name() == "filter").count(), 1);

    // Keys hashing to partition 0 have no local copy.
    let result = run(&mut pipeline);
    assert_eq!(result.status, RunPhase::Stopped);
    assert!(result.stage_counters("source").errors > 0);
}

#[test]
fn test_stage_error_stops_the_run() {
    let probe = Arc::new(Probe::default());
    let graph = GraphBuilder::new()
        .add(generator("gen", "unbounded"))
        .add(StageNode::new("check", "probed").with_property("fail_after", "10"))
        .add(StageNode::new("sink", Discard::TYPE))
        .hop("gen", "check")
        .hop("check", "sink")
        .build()
        .unwrap();
    let config = EngineConfig::builder()
        .row_set_size(4)
        .poll_interval(Duration::from_millis(5))
        .build();
    let mut pipeline = Engine::new(config)
        .prepare(graph, &probed_registry(&probe), &PrepareOptions::default())
        .unwrap();

    let result = run(&mut pipeline);
    assert_eq!(result.status, RunPhase::Stopped);
    assert_eq!(result.errors, 1);
    assert!(!result.is_success());
    let check = result.stage("check").next().unwrap();
    assert_eq!(check.status, StageStatus::Stopped);
    assert_eq!(check.counters.lines_written, 10);
    assert_eq!(probe.disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_init_failure_runs_nothing() {
    let probe = Arc::new(Probe::default());
    let graph = GraphBuilder::new()
        .add(
            StageNode::new("head", "probed")
                .with_output_fields(RowMeta::new().with_field("id", ValueType::Integer)),
        )
        .add(
            StageNode::new("work", "probed")
                .with_copies(3)
                .with_property("fail_init_copy", "1"),
        )
        .hop("head", "work")
        .build()
        .unwrap();

    let err = engine(ExecutionMode::Threaded)
        .prepare(graph, &probed_registry(&probe), &PrepareOptions::default())
        .unwrap_err();
    let EngineError::Initialization { failures } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, "work");
    assert_eq!(failures[0].copy, 1);
    assert!(failures[0].message.contains("cannot open lookup"));

    assert_eq!(probe.inits.load(Ordering::SeqCst), 4);
    assert_eq!(probe.processed.load(Ordering::SeqCst), 0);
    assert_eq!(probe.disposed.load(Ordering::SeqCst), 4);
}

#[test]
fn test_stop_all_releases_blocked_producers() {
    let mut registry = StageRegistry::with_builtins();
    registry.register_fn("stall", |_node: &StageNode, _copy: usize| {
        Ok::<Box<dyn Stage>, StageError>(Box::new(Stall))
    });
    let graph = GraphBuilder::new()
        .add(generator("gen", "unbounded").with_copies(3))
        .add(StageNode::new("stall", "stall"))
        .hop("gen", "stall")
        .build()
        .unwrap();
    let config = EngineConfig::builder()
        .row_set_size(1)
        .poll_interval(Duration::from_millis(10))
        .build();
    let mut pipeline = Engine::new(config)
        .prepare(graph, &registry, &PrepareOptions::default())
        .unwrap();
    pipeline.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(pipeline.is_running());

    let stopped_at = Instant::now();
    pipeline.stop_all();
    assert!(pipeline.wait_until_finished_timeout(Duration::from_secs(5)));
    assert!(stopped_at.elapsed() < Duration::from_secs(2));

    let result = pipeline.result();
    assert_eq!(result.status, RunPhase::Stopped);
    assert!(result.stages.iter().all(|s| s.status == StageStatus::Stopped));
    assert!(pipeline.is_stopped());
}

#[test]
fn test_pause_and_resume() {
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("unbounded", 1), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    pipeline.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    pipeline.pause_all();
    assert!(pipeline.is_paused());
    assert_eq!(pipeline.phase(), RunPhase::Paused);
    thread::sleep(Duration::from_millis(30));
    let before = pipeline.aggregate_counters().lines_written;
    thread::sleep(Duration::from_millis(50));
    let during = pipeline.aggregate_counters().lines_written;
    // At most one in-flight put per copy completes after the pause.
    assert!(during <= before + 3, "{before} -> {during}");
    assert!(pipeline
        .status_snapshot()
        .iter()
        .all(|s| s.status == StageStatus::Paused));

    pipeline.resume_all();
    assert!(!pipeline.is_paused());
    thread::sleep(Duration::from_millis(30));
    assert!(pipeline.aggregate_counters().lines_written > during);

    pipeline.stop_all();
    assert!(pipeline.wait_until_finished_timeout(WAIT));
}

#[test]
fn test_row_producer_feeds_a_stage() {
    let graph = GraphBuilder::new()
        .add(StageNode::new("pass", Passthrough::TYPE))
        .add(StageNode::new("sink", Discard::TYPE))
        .hop("pass", "sink")
        .build()
        .unwrap();
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();

    assert!(matches!(
        pipeline.add_row_producer("pass", 1),
        Err(EngineError::UnknownCopy { copy: 1, .. })
    ));
    let producer = pipeline.add_row_producer("pass", 0).unwrap();
    pipeline.start().unwrap();
    assert!(matches!(
        pipeline.add_row_producer("pass", 0),
        Err(EngineError::AlreadyStarted)
    ));

    for id in 0..25 {
        producer
            .put_row_timeout(Row::new(vec![Value::Integer(id)]), WAIT)
            .unwrap();
    }
    producer.finished();

    assert!(pipeline.wait_until_finished_timeout(WAIT));
    let result = pipeline.result();
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("sink").lines_read, 25);
}

#[test]
fn test_listeners_see_every_completion() {
    let events = Arc::new(CountEvents::default());
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("100", 3), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    pipeline.add_listener(Arc::clone(&events) as Arc<dyn PipelineListener>);

    run(&mut pipeline);
    assert_eq!(events.started.load(Ordering::SeqCst), 1);
    assert_eq!(events.stages.load(Ordering::SeqCst), 5);
    assert_eq!(events.all.load(Ordering::SeqCst), 1);
}

#[test]
fn test_error_rows_reach_the_error_hop() {
    let graph = GraphBuilder::new()
        .add(generator("gen", "20"))
        .add(
            StageNode::new("filter", RejectFilter::TYPE)
                .with_property("field", "id")
                .with_property("reject_every", "5")
                .with_output_fields(RowGenerator::fields())
                .with_error_handling(ErrorHandling::to("rejects")),
        )
        .add(StageNode::new("sink", Discard::TYPE))
        .add(StageNode::new("rejects", Discard::TYPE))
        .hop("gen", "filter")
        .hop("filter", "sink")
        .hop("filter", "rejects")
        .build()
        .unwrap();
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();

    let result = run(&mut pipeline);
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stage_counters("filter").lines_rejected, 4);
    assert_eq!(result.stage_counters("sink").lines_read, 16);
    assert_eq!(result.stage_counters("rejects").lines_read, 4);
}

#[test]
fn test_rejection_limit_fails_the_run() {
    let graph = GraphBuilder::new()
        .add(generator("gen", "20"))
        .add(
            StageNode::new("filter", RejectFilter::TYPE)
                .with_property("field", "id")
                .with_property("reject_every", "2")
                .with_error_handling(ErrorHandling::to("rejects").with_max_errors(3)),
        )
        .add(StageNode::new("rejects", Discard::TYPE))
        .hop("gen", "filter")
        .hop("filter", "rejects")
        .build()
        .unwrap();
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();

    let result = run(&mut pipeline);
    assert_eq!(result.status, RunPhase::Stopped);
    assert!(result.stage_counters("filter").errors >= 1);
}

#[test]
fn test_start_twice_and_wrong_mode() {
    let mut pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("5", 1), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    pipeline.start().unwrap();
    assert!(matches!(pipeline.start(), Err(EngineError::AlreadyStarted)));
    pipeline.wait_until_finished();

    let mut cooperative = engine(ExecutionMode::Cooperative)
        .prepare(linear_graph("5", 1), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    assert!(matches!(
        cooperative.start(),
        Err(EngineError::WrongMode(ExecutionMode::Cooperative))
    ));
}

#[test]
fn test_wait_without_start_returns() {
    let pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("5", 1), &StageRegistry::with_builtins(), &PrepareOptions::default())
        .unwrap();
    pipeline.wait_until_finished();
    assert!(!pipeline.wait_until_finished_timeout(Duration::from_millis(1)));
    assert_eq!(pipeline.phase(), RunPhase::Preparing);
}

// ---- Configuration errors ----

fn prepare_err(graph: PipelineGraph, options: &PrepareOptions) -> EngineError {
    engine(ExecutionMode::Threaded)
        .prepare(graph, &StageRegistry::with_builtins(), options)
        .unwrap_err()
}

#[test]
fn test_unknown_stage_type() {
    let graph = GraphBuilder::new().stage("x", "no_such_type").build().unwrap();
    let err = prepare_err(graph, &PrepareOptions::default());
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no_such_type"));
}

#[test]
fn test_serializable_key_is_rejected() {
    let schema = PartitionSchema::with_count("s", 2);
    let graph = GraphBuilder::new()
        .add(
            StageNode::new("src", Passthrough::TYPE)
                .with_output_fields(RowMeta::new().with_field("blob", ValueType::Serializable)),
        )
        .add(
            StageNode::new("part", Passthrough::TYPE)
                .with_partitioning(StagePartitioning::hash(schema, "blob")),
        )
        .hop("src", "part")
        .build()
        .unwrap();
    let err = prepare_err(graph, &PrepareOptions::default());
    assert!(err.is_configuration());
    assert!(err.to_string().contains("blob"));
}

#[test]
fn test_partition_key_needs_declared_field() {
    let schema = PartitionSchema::with_count("s", 2);
    let graph = GraphBuilder::new()
        .add(generator("src", "1"))
        .add(
            StageNode::new("part", Passthrough::TYPE)
                .with_partitioning(StagePartitioning::modulo(schema, "missing")),
        )
        .hop("src", "part")
        .build()
        .unwrap();
    assert!(prepare_err(graph, &PrepareOptions::default()).is_configuration());
}

#[test]
fn test_copy_overrides_are_checked() {
    let options = PrepareOptions::new().with_copies("ghost", 2);
    assert!(prepare_err(linear_graph("1", 1), &options).is_configuration());

    let schema = PartitionSchema::with_count("s", 2);
    let graph = GraphBuilder::new()
        .add(generator("src", "1"))
        .add(
            StageNode::new("part", Passthrough::TYPE)
                .with_partitioning(StagePartitioning::hash(schema, "id")),
        )
        .hop("src", "part")
        .build()
        .unwrap();
    let options = PrepareOptions::new().with_copies("part", 3);
    assert!(prepare_err(graph, &options).is_configuration());
}

#[test]
fn test_copy_override_applies() {
    let options = PrepareOptions::new().with_copies("pass", 4);
    let pipeline = engine(ExecutionMode::Threaded)
        .prepare(linear_graph("1", 1), &StageRegistry::with_builtins(), &options)
        .unwrap();
    assert_eq!(pipeline.handles().iter().filter(|h| h.name() == "pass").count(), 4);
}
