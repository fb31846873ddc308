//! Row I/O of one stage copy.
//!
//! A [`StageContext`] owns the copy's channel ends. Stages never touch
//! channels directly: they read with [`StageContext::get_row`] and write with
//! [`StageContext::put_row`], and the context applies input rotation, output
//! distribution, partition routing, error rows and rejection limits.
//!
//! Reads block only in threaded runs. In serial and cooperative runs a read
//! returns `None` as soon as nothing is buffered, and the stage reports
//! [`StageContext::outcome_when_idle`] to tell "exhausted" from "not yet".
//!
//! Writes never block outside threaded runs either. A row refused by a full
//! channel joins the copy's backlog, and later rows queue behind it so each
//! channel keeps its order. The runtime flushes the backlog before the next
//! `process_row` call and skips that call while the backlog stays blocked.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::warn;

use super::counters::StageCounters;
use super::error::StageError;
use super::listener::RowListener;
use super::ProcessOutcome;
use crate::allocator::OutputGroup;
use crate::channel::{ChannelRef, RowChannel};
use crate::engine::ExecutionState;
use crate::graph::StageNode;
use crate::partition::{PartitionError, Partitioner};
use crate::row::{Row, RowMeta, Value, ValueType};

/// Rows read from one input before `get_row` rotates to the next.
pub const ROWS_PER_BLOCK: usize = 500;

/// Names of the fields appended to error rows, in order.
pub const ERROR_FIELDS: [&str; 4] = ["nr_errors", "error_description", "error_fields", "error_codes"];

/// Wait per input while rotating over several blocking inputs.
const ROTATE_WAIT: Duration = Duration::from_millis(1);

/// Partition served by a stage copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    /// Partition number.
    pub nr: usize,
    /// Partition id from the schema.
    pub id: String,
}

/// How rows reach the copies of one downstream stage.
#[derive(Debug)]
pub(crate) enum Routing {
    /// Distributed or copied together with the other plain outputs.
    Plain,
    /// Every copy of the target receives every row.
    Mirror,
    /// The target's partitioner picks exactly one copy.
    Partitioned {
        partitioner: Arc<dyn Partitioner>,
        /// Local copy serving each partition number.
        copy_of_partition: Vec<Option<usize>>,
    },
}

/// One output hop of a copy together with its routing.
#[derive(Debug)]
pub(crate) struct OutputRoute {
    pub(crate) target: String,
    pub(crate) group: OutputGroup,
    pub(crate) routing: Routing,
    cursor: usize,
}

impl OutputRoute {
    pub(crate) fn new(target: impl Into<String>, group: OutputGroup, routing: Routing) -> Self {
        Self {
            target: target.into(),
            group,
            routing,
            cursor: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct InputStream {
    from: String,
    channel: ChannelRef,
}

/// Everything the engine hands a context at construction.
pub(crate) struct ContextParts {
    pub(crate) node: Arc<StageNode>,
    pub(crate) copy: usize,
    pub(crate) copies: usize,
    pub(crate) partition: Option<PartitionSlot>,
    pub(crate) input_fields: Option<RowMeta>,
    /// Input channels with the producing stage's name.
    pub(crate) inputs: Vec<(String, bool, ChannelRef)>,
    pub(crate) outputs: Vec<OutputRoute>,
    pub(crate) state: Arc<ExecutionState>,
    pub(crate) counters: Arc<StageCounters>,
    pub(crate) blocking: bool,
}

/// Row I/O and identity of one running stage copy.
pub struct StageContext {
    node: Arc<StageNode>,
    copy: usize,
    copies: usize,
    partition: Option<PartitionSlot>,
    input_fields: Option<RowMeta>,
    inputs: Vec<InputStream>,
    had_main_inputs: bool,
    info_inputs: Vec<InputStream>,
    current_input: usize,
    block_pointer: usize,
    outputs: Vec<OutputRoute>,
    plain: Vec<ChannelRef>,
    next_plain: usize,
    errors_out: Vec<ChannelRef>,
    next_error: usize,
    counters: Arc<StageCounters>,
    state: Arc<ExecutionState>,
    blocking: bool,
    listeners: Vec<Arc<dyn RowListener>>,
    rejection_tripped: bool,
    /// Rows waiting for space on a full non-blocking channel.
    backlog: Mutex<VecDeque<(ChannelRef, Row)>>,
}

impl StageContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        let mut inputs = Vec::new();
        let mut info_inputs = Vec::new();
        for (from, info, channel) in parts.inputs {
            let stream = InputStream { from, channel };
            if info {
                info_inputs.push(stream);
            } else {
                inputs.push(stream);
            }
        }

        let mut plain = Vec::new();
        let mut errors_out = Vec::new();
        for route in &parts.outputs {
            let channels = route.group.targets.iter().map(|t| ChannelRef::clone(&t.channel));
            if route.group.error {
                errors_out.extend(channels);
            } else if matches!(route.routing, Routing::Plain) {
                plain.extend(channels);
            }
        }

        Self {
            node: parts.node,
            copy: parts.copy,
            copies: parts.copies,
            partition: parts.partition,
            input_fields: parts.input_fields,
            had_main_inputs: !inputs.is_empty(),
            inputs,
            info_inputs,
            current_input: 0,
            block_pointer: 0,
            outputs: parts.outputs,
            plain,
            next_plain: 0,
            errors_out,
            next_error: 0,
            counters: parts.counters,
            state: parts.state,
            blocking: parts.blocking,
            listeners: Vec::new(),
            rejection_tripped: false,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    // ---- Identity ----

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Stage type tag.
    #[must_use]
    pub fn stage_type(&self) -> &str {
        &self.node.stage_type
    }

    /// Copy index of this runtime.
    #[must_use]
    pub fn copy(&self) -> usize {
        self.copy
    }

    /// Number of copies of the stage on this host.
    #[must_use]
    pub fn copies(&self) -> usize {
        self.copies
    }

    /// The stage's graph node.
    #[must_use]
    pub fn node(&self) -> &StageNode {
        &self.node
    }

    /// Stage-specific setting.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.node.property(key)
    }

    /// Partition served by this copy, if the stage is partitioned.
    #[must_use]
    pub fn partition(&self) -> Option<&PartitionSlot> {
        self.partition.as_ref()
    }

    /// Partition id served by this copy.
    #[must_use]
    pub fn partition_id(&self) -> Option<&str> {
        self.partition.as_ref().map(|p| p.id.as_str())
    }

    /// Partition number served by this copy.
    #[must_use]
    pub fn partition_nr(&self) -> Option<usize> {
        self.partition.as_ref().map(|p| p.nr)
    }

    /// Layout declared by the first upstream stage, if any.
    #[must_use]
    pub fn input_fields(&self) -> Option<&RowMeta> {
        self.input_fields.as_ref()
    }

    /// Layout this stage declared for its output rows.
    #[must_use]
    pub fn output_fields(&self) -> Option<&RowMeta> {
        self.node.output_fields.as_ref()
    }

    // ---- Run control ----

    /// Returns true once the run was asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Requests a stop of the whole run.
    pub fn stop_run(&self) {
        self.state.request_stop();
    }

    /// Outcome to report when `get_row` returned `None`.
    ///
    /// `Done` once every main input is exhausted or the run is stopping,
    /// `Continue` while rows may still arrive.
    #[must_use]
    pub fn outcome_when_idle(&self) -> ProcessOutcome {
        if self.is_input_exhausted() || self.state.is_stopped() {
            ProcessOutcome::Done
        } else {
            ProcessOutcome::Continue
        }
    }

    /// Returns true when every main input is done and drained.
    #[must_use]
    pub fn is_input_exhausted(&self) -> bool {
        self.inputs.is_empty()
    }

    // ---- Counters ----

    /// The copy's counters.
    #[must_use]
    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    /// Counts a row read from an external source.
    pub fn inc_lines_input(&self) {
        StageCounters::bump(&self.counters.lines_input);
    }

    /// Counts a row written to an external target.
    pub fn inc_lines_output(&self) {
        StageCounters::bump(&self.counters.lines_output);
    }

    /// Counts a row updated in an external target.
    pub fn inc_lines_updated(&self) {
        StageCounters::bump(&self.counters.lines_updated);
    }

    /// Counts a skipped row.
    pub fn inc_lines_skipped(&self) {
        StageCounters::bump(&self.counters.lines_skipped);
    }

    // ---- Reading ----

    /// Takes the next row from the main inputs.
    ///
    /// Inputs are read round-robin: the context stays on one input for up to
    /// [`ROWS_PER_BLOCK`] rows and moves on early when it is empty. An input
    /// that is done and drained is dropped from the rotation. Returns `None`
    /// when every input is exhausted, when the run stops, or (outside
    /// threaded runs) when nothing is buffered right now.
    pub fn get_row(&mut self) -> Option<Row> {
        self.state.wait_while_paused();
        if self.state.is_stopped() || self.inputs.is_empty() {
            return None;
        }
        if self.block_pointer >= ROWS_PER_BLOCK {
            self.next_input();
        }

        let mut misses = 0;
        loop {
            if self.inputs.is_empty() || self.state.is_stopped() {
                return None;
            }
            let channel = ChannelRef::clone(&self.inputs[self.current_input].channel);
            // Done is read before the take so an empty take proves the
            // input drained.
            let done = channel.is_done();
            let row = if !self.blocking {
                channel.get(false)
            } else if self.inputs.len() == 1 {
                channel.get_timeout(self.state.poll_interval())
            } else {
                channel.get_timeout(ROTATE_WAIT)
            };
            if let Some(row) = row {
                self.block_pointer += 1;
                return Some(self.accept(row));
            }

            if done {
                self.inputs.remove(self.current_input);
                if self.current_input >= self.inputs.len() {
                    self.current_input = 0;
                }
                self.block_pointer = 0;
                misses = 0;
                continue;
            }

            self.next_input();
            misses += 1;
            if !self.blocking && misses >= self.inputs.len() {
                return None;
            }
        }
    }

    /// Takes the next row sent by `from` over a main input.
    pub fn get_row_from(&mut self, from: &str) -> Option<Row> {
        let channels = Self::channels_from(&self.inputs, from);
        self.read_any(&channels)
    }

    /// Takes the next row sent by `from` over an info input.
    pub fn get_info_row(&mut self, from: &str) -> Option<Row> {
        let channels = Self::channels_from(&self.info_inputs, from);
        self.read_any(&channels)
    }

    fn channels_from(streams: &[InputStream], from: &str) -> SmallVec<[ChannelRef; 4]> {
        streams
            .iter()
            .filter(|s| s.from == from)
            .map(|s| ChannelRef::clone(&s.channel))
            .collect()
    }

    fn read_any(&mut self, channels: &[ChannelRef]) -> Option<Row> {
        loop {
            self.state.wait_while_paused();
            if self.state.is_stopped() {
                return None;
            }
            let mut pending = None;
            for channel in channels {
                let done = channel.is_done();
                if let Some(row) = channel.get(false) {
                    return Some(self.accept(row));
                }
                if !done && pending.is_none() {
                    pending = Some(channel);
                }
            }
            let channel = pending?;
            if !self.blocking {
                return None;
            }
            if let Some(row) = channel.get_timeout(self.state.poll_interval()) {
                return Some(self.accept(row));
            }
        }
    }

    fn next_input(&mut self) {
        if !self.inputs.is_empty() {
            self.current_input = (self.current_input + 1) % self.inputs.len();
        }
        self.block_pointer = 0;
    }

    fn accept(&mut self, row: Row) -> Row {
        StageCounters::bump(&self.counters.lines_read);
        for listener in &self.listeners {
            listener.on_row_read(&row);
        }
        self.verify_rejection_rates();
        row
    }

    // ---- Writing ----

    /// Puts a row on the outputs.
    ///
    /// Plain outputs get the row round-robin when the stage distributes and
    /// all of them get it otherwise. A hop into a differently partitioned
    /// stage routes the row to the copy serving its partition, and a hop
    /// into a mirrored stage sends it to every copy. Error outputs are never
    /// written here. Rows put after a stop are dropped.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Partition` when the key cannot be routed and
    /// `StageError::Channel` when a non-blocking channel refused the row.
    pub fn put_row(&mut self, row: Row) -> Result<(), StageError> {
        self.state.wait_while_paused();
        if self.state.is_stopped() {
            return Ok(());
        }

        for route in self.outputs.iter().filter(|r| !r.group.error) {
            match &route.routing {
                Routing::Plain => {}
                Routing::Mirror => {
                    for target in &route.group.targets {
                        self.write(&target.channel, row.clone())?;
                    }
                }
                Routing::Partitioned {
                    partitioner,
                    copy_of_partition,
                } => {
                    let partition = partitioner.partition(&row)?;
                    let channel = Self::partition_channel(route, copy_of_partition, partition)?;
                    self.write(channel, row.clone())?;
                }
            }
        }

        match self.plain.len() {
            0 => {}
            1 => self.write(&self.plain[0], row.clone())?,
            n if self.node.distribute => {
                let index = self.next_plain % n;
                self.next_plain = (index + 1) % n;
                self.write(&self.plain[index], row.clone())?;
            }
            _ => {
                for channel in &self.plain {
                    self.write(channel, row.clone())?;
                }
            }
        }

        for listener in &self.listeners {
            listener.on_row_written(&row);
        }
        Ok(())
    }

    /// Puts a row on the hop into `target` only.
    ///
    /// Uses that hop's routing; plain hops with several copies take the row
    /// round-robin.
    ///
    /// # Errors
    ///
    /// Returns `StageError::UnknownOutput` if `target` is not a successor,
    /// or the errors of [`StageContext::put_row`].
    pub fn put_row_to(&mut self, target: &str, row: Row) -> Result<(), StageError> {
        self.state.wait_while_paused();
        let Some(index) = self
            .outputs
            .iter()
            .position(|r| r.target == target && !r.group.error)
        else {
            return Err(StageError::UnknownOutput {
                stage: self.node.name.clone(),
                target: target.to_string(),
            });
        };
        if self.state.is_stopped() {
            return Ok(());
        }

        if matches!(self.outputs[index].routing, Routing::Plain) {
            let route = &mut self.outputs[index];
            let n = route.group.targets.len();
            if n > 0 {
                let slot = route.cursor % n;
                route.cursor = (slot + 1) % n;
                let channel = ChannelRef::clone(&route.group.targets[slot].channel);
                self.write(&channel, row.clone())?;
            }
        } else {
            let route = &self.outputs[index];
            match &route.routing {
                Routing::Plain => {}
                Routing::Mirror => {
                    for t in &route.group.targets {
                        self.write(&t.channel, row.clone())?;
                    }
                }
                Routing::Partitioned {
                    partitioner,
                    copy_of_partition,
                } => {
                    let partition = partitioner.partition(&row)?;
                    let channel = Self::partition_channel(route, copy_of_partition, partition)?;
                    self.write(channel, row.clone())?;
                }
            }
        }

        for listener in &self.listeners {
            listener.on_row_written(&row);
        }
        Ok(())
    }

    /// Sends a failed row to the error output.
    ///
    /// The row is extended with the [`ERROR_FIELDS`] values, counted as
    /// rejected, and the stage's rejection limits are checked.
    ///
    /// # Errors
    ///
    /// Returns `StageError::NoErrorOutput` if the stage has no error hop.
    pub fn put_error(
        &mut self,
        row: &Row,
        errors: u64,
        description: &str,
        fields: &str,
        codes: &str,
    ) -> Result<(), StageError> {
        if self.errors_out.is_empty() {
            return Err(StageError::NoErrorOutput(self.node.name.clone()));
        }
        self.state.wait_while_paused();
        StageCounters::bump(&self.counters.lines_rejected);

        let mut values = row.values().to_vec();
        values.extend([
            Value::Integer(i64::try_from(errors).unwrap_or(i64::MAX)),
            Value::from(description),
            Value::from(fields),
            Value::from(codes),
        ]);
        let error_row = Row::new(values);

        if !self.state.is_stopped() {
            let n = self.errors_out.len();
            let index = self.next_error % n;
            self.next_error = (index + 1) % n;
            self.send(&self.errors_out[index], error_row.clone())?;
            for listener in &self.listeners {
                listener.on_error_row(&error_row);
            }
        }
        self.verify_rejection_rates();
        Ok(())
    }

    fn partition_channel<'a>(
        route: &'a OutputRoute,
        copy_of_partition: &[Option<usize>],
        partition: usize,
    ) -> Result<&'a ChannelRef, PartitionError> {
        let copy = copy_of_partition
            .get(partition)
            .copied()
            .flatten()
            .ok_or(PartitionError::UnservedPartition(partition))?;
        route
            .group
            .targets
            .iter()
            .find(|t| t.copy == copy)
            .map(|t| &t.channel)
            .ok_or(PartitionError::UnservedPartition(partition))
    }

    fn write(&self, channel: &ChannelRef, row: Row) -> Result<(), StageError> {
        if self.send(channel, row)? {
            StageCounters::bump(&self.counters.lines_written);
        }
        Ok(())
    }

    /// Returns false when the row was dropped because the run stopped.
    ///
    /// A row refused by a full non-blocking channel is backlogged and counts
    /// as sent.
    fn send(&self, channel: &ChannelRef, row: Row) -> Result<bool, StageError> {
        let mut backlog = self.backlog.lock();
        if !backlog.is_empty() {
            backlog.push_back((ChannelRef::clone(channel), row));
            return Ok(true);
        }
        match channel.put(row, self.blocking) {
            Ok(()) => Ok(true),
            Err(e) if e.is_stopped() => Ok(false),
            Err(e) if e.is_full() && !self.blocking => {
                backlog.push_back((ChannelRef::clone(channel), e.row));
                Ok(true)
            }
            Err(e) => Err(StageError::Channel {
                channel: channel.id().to_string(),
                reason: e.reason,
            }),
        }
    }

    /// Fails the run once the rejected rows exceed the configured limits.
    fn verify_rejection_rates(&mut self) {
        if self.rejection_tripped {
            return;
        }
        let Some(handling) = self.node.error_handling.as_ref() else {
            return;
        };
        let snapshot = self.counters.snapshot();
        let rejected = snapshot.lines_rejected;
        let read = snapshot.lines_read;

        let too_many = handling.max_errors > 0 && rejected > handling.max_errors;
        let percent_applies = handling.max_percent_errors > 0
            && rejected > 0
            && (handling.min_rows_for_percent == 0 || read >= handling.min_rows_for_percent);
        let too_high = percent_applies
            && rejected.saturating_mul(100) > u64::from(handling.max_percent_errors).saturating_mul(read);

        if too_many || too_high {
            warn!(
                stage = %self.node.name,
                copy = self.copy,
                rejected,
                read,
                max_errors = handling.max_errors,
                max_percent = handling.max_percent_errors,
                "rejected rows exceed the error limits, stopping the run"
            );
            self.rejection_tripped = true;
            self.counters.ensure_errors(1);
            self.state.request_stop();
        }
    }

    // ---- Engine hooks ----

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn RowListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn add_main_input(&mut self, from: impl Into<String>, channel: ChannelRef) {
        self.inputs.push(InputStream {
            from: from.into(),
            channel,
        });
        self.had_main_inputs = true;
    }

    /// Rows still waiting in the backlog.
    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Writes backlogged rows in order until a channel is full again.
    ///
    /// Returns true once the backlog is empty. Rows are dropped when the
    /// run stopped.
    pub(crate) fn flush_backlog(&self) -> Result<bool, StageError> {
        let mut backlog = self.backlog.lock();
        if self.state.is_stopped() {
            backlog.clear();
            return Ok(true);
        }
        while let Some((channel, row)) = backlog.pop_front() {
            match channel.put(row, false) {
                Ok(()) => {}
                Err(e) if e.is_full() => {
                    backlog.push_front((channel, e.row));
                    return Ok(false);
                }
                Err(e) if e.is_stopped() => {
                    backlog.clear();
                    break;
                }
                Err(e) => {
                    backlog.clear();
                    return Err(StageError::Channel {
                        channel: channel.id().to_string(),
                        reason: e.reason,
                    });
                }
            }
        }
        Ok(true)
    }

    /// Marks every output channel done.
    pub(crate) fn mark_outputs_done(&self) {
        for route in &self.outputs {
            for target in &route.group.targets {
                target.channel.mark_done();
            }
        }
    }

    pub(crate) fn had_main_inputs(&self) -> bool {
        self.had_main_inputs
    }

    /// Rows buffered on the main inputs still in rotation.
    pub(crate) fn buffered_main_rows(&self) -> usize {
        self.inputs.iter().map(|s| s.channel.size()).sum()
    }

    /// Returns true when every main input still in rotation is done.
    pub(crate) fn main_inputs_done(&self) -> bool {
        self.inputs.iter().all(|s| s.channel.is_done())
    }

    /// Rows buffered on the info inputs.
    pub(crate) fn buffered_info_rows(&self) -> usize {
        self.info_inputs.iter().map(|s| s.channel.size()).sum()
    }
}

/// Layout of the rows `put_error` writes for input rows laid out as `base`.
#[must_use]
pub fn error_row_fields(base: &RowMeta) -> RowMeta {
    let types = [
        ValueType::Integer,
        ValueType::String,
        ValueType::String,
        ValueType::String,
    ];
    ERROR_FIELDS
        .iter()
        .zip(types)
        .fold(base.clone(), |meta, (name, value_type)| {
            meta.with_field(*name, value_type)
        })
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("stage", &self.node.name)
            .field("copy", &self.copy)
            .field("partition", &self.partition)
            .field("inputs", &self.inputs.len())
            .field("info_inputs", &self.info_inputs.len())
            .field("outputs", &self.outputs.len())
            .field("blocking", &self.blocking)
            .field("backlog", &self.backlog_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::allocator::{DispatchClass, OutputTarget};
    use crate::channel::{ChannelId, QueueChannel, RowChannel, StopSignal};
    use crate::graph::{ErrorHandling, HopId, StageId};
    use crate::partition::HashPartitioner;
    use parking_lot::Mutex;

    fn state() -> Arc<ExecutionState> {
        Arc::new(ExecutionState::new(StopSignal::new(), Duration::from_millis(1)))
    }

    fn queue(from: &str, to: &str, copy: usize) -> ChannelRef {
        Arc::new(QueueChannel::new(ChannelId::new(from, 0, to, copy)))
    }

    fn group(to: u32, targets: &[&ChannelRef], error: bool) -> OutputGroup {
        OutputGroup {
            hop: HopId(to),
            to: StageId(to),
            class: DispatchClass::OneToMany,
            repartition: false,
            error,
            info: false,
            targets: targets
                .iter()
                .enumerate()
                .map(|(copy, channel)| OutputTarget {
                    copy,
                    channel: ChannelRef::clone(channel),
                })
                .collect(),
        }
    }

    fn context(
        node: StageNode,
        inputs: Vec<(String, bool, ChannelRef)>,
        outputs: Vec<OutputRoute>,
        state: &Arc<ExecutionState>,
    ) -> StageContext {
        StageContext::new(ContextParts {
            node: Arc::new(node),
            copy: 0,
            copies: 1,
            partition: None,
            input_fields: None,
            inputs,
            outputs,
            state: Arc::clone(state),
            counters: Arc::new(StageCounters::new()),
            blocking: false,
        })
    }

    fn row(id: i64) -> Row {
        Row::new(vec![Value::from(id)])
    }

    fn drain(channel: &ChannelRef) -> Vec<i64> {
        std::iter::from_fn(|| channel.get(false))
            .map(|r| r.get(0).and_then(Value::as_integer).unwrap())
            .collect()
    }

    // ---- reading ----

    #[test]
    fn test_get_row_switches_inputs_after_a_block() {
        let a = queue("a", "s", 0);
        let b = queue("b", "s", 0);
        for i in 0..600 {
            a.put(row(i), false).unwrap();
            b.put(row(1000 + i), false).unwrap();
        }
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![("a".into(), false, Arc::clone(&a)), ("b".into(), false, Arc::clone(&b))],
            vec![],
            &st,
        );
        let first: Vec<i64> = (0..ROWS_PER_BLOCK + 1)
            .map(|_| ctx.get_row().unwrap().get(0).and_then(Value::as_integer).unwrap())
            .collect();
        assert!(first[..ROWS_PER_BLOCK].iter().all(|&v| v < 1000));
        assert_eq!(first[ROWS_PER_BLOCK], 1000);
    }

    #[test]
    fn test_get_row_moves_on_from_empty_input() {
        let a = queue("a", "s", 0);
        let b = queue("b", "s", 0);
        b.put(row(7), false).unwrap();
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![("a".into(), false, a), ("b".into(), false, b)],
            vec![],
            &st,
        );
        assert_eq!(ctx.get_row(), Some(row(7)));
        assert_eq!(ctx.get_row(), None);
        assert_eq!(ctx.outcome_when_idle(), ProcessOutcome::Continue);
    }

    #[test]
    fn test_drained_inputs_leave_rotation() {
        let a = queue("a", "s", 0);
        let b = queue("b", "s", 0);
        a.put(row(1), false).unwrap();
        a.mark_done();
        b.mark_done();
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![("a".into(), false, a), ("b".into(), false, b)],
            vec![],
            &st,
        );
        assert_eq!(ctx.get_row(), Some(row(1)));
        assert_eq!(ctx.get_row(), None);
        assert!(ctx.is_input_exhausted());
        assert_eq!(ctx.outcome_when_idle(), ProcessOutcome::Done);
        assert_eq!(ctx.counters().snapshot().lines_read, 1);
    }

    #[test]
    fn test_info_rows_are_read_by_name() {
        let main = queue("a", "s", 0);
        let info = queue("lookup", "s", 0);
        main.put(row(1), false).unwrap();
        info.put(row(42), false).unwrap();
        info.mark_done();
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![("a".into(), false, main), ("lookup".into(), true, info)],
            vec![],
            &st,
        );
        assert_eq!(ctx.get_info_row("lookup"), Some(row(42)));
        assert_eq!(ctx.get_info_row("lookup"), None);
        assert_eq!(ctx.get_info_row("other"), None);
        assert_eq!(ctx.get_row(), Some(row(1)));
    }

    // ---- writing ----

    #[test]
    fn test_distribute_round_robin() {
        let outs = [queue("s", "b", 0), queue("s", "b", 1)];
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new("b", group(1, &[&outs[0], &outs[1]], false), Routing::Plain)],
            &st,
        );
        for i in 0..4 {
            ctx.put_row(row(i)).unwrap();
        }
        assert_eq!(drain(&outs[0]), vec![0, 2]);
        assert_eq!(drain(&outs[1]), vec![1, 3]);
        assert_eq!(ctx.counters().snapshot().lines_written, 4);
    }

    #[test]
    fn test_copy_to_all() {
        let outs = [queue("s", "b", 0), queue("s", "c", 0)];
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t").copy_rows(),
            vec![],
            vec![
                OutputRoute::new("b", group(1, &[&outs[0]], false), Routing::Plain),
                OutputRoute::new("c", group(2, &[&outs[1]], false), Routing::Plain),
            ],
            &st,
        );
        ctx.put_row(row(5)).unwrap();
        assert_eq!(drain(&outs[0]), vec![5]);
        assert_eq!(drain(&outs[1]), vec![5]);
    }

    #[test]
    fn test_partitioned_routing_is_stable() {
        let outs = [queue("s", "p", 0), queue("s", "p", 1)];
        let st = state();
        let partitioner: Arc<dyn Partitioner> = Arc::new(HashPartitioner::new(0, 2).unwrap());
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new(
                "p",
                group(1, &[&outs[0], &outs[1]], false),
                Routing::Partitioned {
                    partitioner: Arc::clone(&partitioner),
                    copy_of_partition: vec![Some(0), Some(1)],
                },
            )],
            &st,
        );
        for i in 0..50 {
            ctx.put_row(row(i % 10)).unwrap();
        }
        for (copy, out) in outs.iter().enumerate() {
            for id in drain(out) {
                assert_eq!(partitioner.partition(&row(id)).unwrap(), copy);
            }
        }
    }

    #[test]
    fn test_unserved_partition_fails() {
        let out = queue("s", "p", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new(
                "p",
                group(1, &[&out], false),
                Routing::Partitioned {
                    partitioner: Arc::new(crate::partition::ModPartitioner::new(0, 2).unwrap()),
                    copy_of_partition: vec![Some(0), None],
                },
            )],
            &st,
        );
        ctx.put_row(row(2)).unwrap();
        let err = ctx.put_row(row(3)).unwrap_err();
        assert!(matches!(
            err,
            StageError::Partition(PartitionError::UnservedPartition(1))
        ));
    }

    #[test]
    fn test_mirror_reaches_every_copy() {
        let outs = [queue("s", "m", 0), queue("s", "m", 1), queue("s", "m", 2)];
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new(
                "m",
                group(1, &[&outs[0], &outs[1], &outs[2]], false),
                Routing::Mirror,
            )],
            &st,
        );
        ctx.put_row(row(1)).unwrap();
        assert!(outs.iter().all(|o| drain(o) == vec![1]));
    }

    #[test]
    fn test_put_row_to_targets_one_hop() {
        let outs = [queue("s", "b", 0), queue("s", "c", 0)];
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![
                OutputRoute::new("b", group(1, &[&outs[0]], false), Routing::Plain),
                OutputRoute::new("c", group(2, &[&outs[1]], false), Routing::Plain),
            ],
            &st,
        );
        ctx.put_row_to("c", row(9)).unwrap();
        assert!(drain(&outs[0]).is_empty());
        assert_eq!(drain(&outs[1]), vec![9]);
        assert!(matches!(
            ctx.put_row_to("zzz", row(1)),
            Err(StageError::UnknownOutput { .. })
        ));
    }

    #[test]
    fn test_rows_after_stop_are_dropped() {
        let out = queue("s", "b", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new("b", group(1, &[&out], false), Routing::Plain)],
            &st,
        );
        st.request_stop();
        ctx.put_row(row(1)).unwrap();
        assert_eq!(out.size(), 0);
    }

    #[test]
    fn test_full_slot_backlogs_rows_in_order() {
        let out: ChannelRef = Arc::new(crate::channel::HandoffChannel::new(
            ChannelId::new("s", 0, "b", 0),
            Duration::from_millis(1),
            StopSignal::new(),
        ));
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new("b", group(1, &[&out], false), Routing::Plain)],
            &st,
        );
        for id in 1..=3 {
            ctx.put_row(row(id)).unwrap();
        }
        assert_eq!(out.size(), 1);
        assert_eq!(ctx.backlog_len(), 2);
        assert_eq!(ctx.counters().snapshot().lines_written, 3);
        assert!(!ctx.flush_backlog().unwrap());

        let mut received = drain(&out);
        assert!(!ctx.flush_backlog().unwrap());
        received.extend(drain(&out));
        assert!(ctx.flush_backlog().unwrap());
        received.extend(drain(&out));
        assert_eq!(received, [1, 2, 3]);
        assert_eq!(ctx.backlog_len(), 0);
    }

    #[test]
    fn test_backlog_into_finished_channel_fails() {
        let out: ChannelRef = Arc::new(crate::channel::HandoffChannel::new(
            ChannelId::new("s", 0, "b", 0),
            Duration::from_millis(1),
            StopSignal::new(),
        ));
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![],
            vec![OutputRoute::new("b", group(1, &[&out], false), Routing::Plain)],
            &st,
        );
        ctx.put_row(row(1)).unwrap();
        ctx.put_row(row(2)).unwrap();
        out.get(false).unwrap();
        out.mark_done();
        let err = ctx.flush_backlog().unwrap_err();
        assert!(matches!(err, StageError::Channel { .. }));
        assert_eq!(ctx.backlog_len(), 0);
    }

    // ---- error rows ----

    #[test]
    fn test_put_error_appends_error_fields() {
        let ok = queue("s", "ok", 0);
        let bad = queue("s", "bad", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t").with_error_handling(ErrorHandling::to("bad")),
            vec![],
            vec![
                OutputRoute::new("ok", group(1, &[&ok], false), Routing::Plain),
                OutputRoute::new("bad", group(2, &[&bad], true), Routing::Plain),
            ],
            &st,
        );
        ctx.put_row(row(1)).unwrap();
        ctx.put_error(&row(2), 1, "bad value", "id", "E001").unwrap();
        assert_eq!(drain(&ok), vec![1]);
        let error_row = bad.get(false).unwrap();
        assert_eq!(error_row.len(), 5);
        assert_eq!(error_row.get(2), Some(&Value::from("bad value")));
        assert_eq!(ctx.counters().snapshot().lines_rejected, 1);
        assert!(!st.is_stopped());
    }

    #[test]
    fn test_put_error_without_error_hop() {
        let st = state();
        let mut ctx = context(StageNode::new("s", "t"), vec![], vec![], &st);
        assert!(matches!(
            ctx.put_error(&row(1), 1, "x", "", ""),
            Err(StageError::NoErrorOutput(_))
        ));
    }

    #[test]
    fn test_max_errors_stops_run() {
        let bad = queue("s", "bad", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t").with_error_handling(ErrorHandling::to("bad").with_max_errors(2)),
            vec![],
            vec![OutputRoute::new("bad", group(1, &[&bad], true), Routing::Plain)],
            &st,
        );
        ctx.put_error(&row(1), 1, "", "", "").unwrap();
        ctx.put_error(&row(2), 1, "", "", "").unwrap();
        assert!(!st.is_stopped());
        ctx.put_error(&row(3), 1, "", "", "").unwrap();
        assert!(st.is_stopped());
        assert_eq!(ctx.counters().error_count(), 1);
    }

    #[test]
    fn test_percent_limit_waits_for_min_rows() {
        let input = queue("a", "s", 0);
        for i in 0..10 {
            input.put(row(i), false).unwrap();
        }
        let bad = queue("s", "bad", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t")
                .with_error_handling(ErrorHandling::to("bad").with_max_percent(20, 10)),
            vec![("a".into(), false, input)],
            vec![OutputRoute::new("bad", group(1, &[&bad], true), Routing::Plain)],
            &st,
        );
        // 3 of the first 5 rows rejected: 60%, but only 5 rows read.
        for i in 0..5 {
            let r = ctx.get_row().unwrap();
            if i < 3 {
                ctx.put_error(&r, 1, "", "", "").unwrap();
            }
        }
        assert!(!st.is_stopped());
        for _ in 5..10 {
            ctx.get_row().unwrap();
        }
        // 3 of 10 rows: 30% > 20%.
        assert!(st.is_stopped());
    }

    // ---- listeners ----

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl RowListener for Recorder {
        fn on_row_read(&self, row: &Row) {
            self.0.lock().push(format!("read {row:?}"));
        }

        fn on_row_written(&self, row: &Row) {
            self.0.lock().push(format!("written {row:?}"));
        }
    }

    #[test]
    fn test_row_listeners() {
        let input = queue("a", "s", 0);
        input.put(row(3), false).unwrap();
        let out = queue("s", "b", 0);
        let st = state();
        let mut ctx = context(
            StageNode::new("s", "t"),
            vec![("a".into(), false, input)],
            vec![OutputRoute::new("b", group(1, &[&out], false), Routing::Plain)],
            &st,
        );
        let recorder = Arc::new(Recorder::default());
        ctx.add_listener(Arc::clone(&recorder) as Arc<dyn RowListener>);
        let r = ctx.get_row().unwrap();
        ctx.put_row(r).unwrap();
        assert_eq!(recorder.0.lock().len(), 2);
    }

    #[test]
    fn test_error_row_fields() {
        let base = RowMeta::new().with_field("id", ValueType::Integer);
        let meta = error_row_fields(&base);
        assert_eq!(meta.len(), 5);
        assert_eq!(meta.index_of("error_codes"), Some(4));
    }
}
