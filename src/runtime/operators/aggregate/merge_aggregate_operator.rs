use arrow::datatypes::SchemaRef;
use tracing::{debug, info, trace};

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::TimeRange;
use crate::common::ts_block::{skip_past_time_range, TsBlock};
use crate::runtime::functions::aggregate::Aggregator;
use crate::runtime::operators::aggregate::result_builder::ResultBlockBuilder;
use crate::runtime::operators::aggregate::utils::{append_aggregation_result, create_output_schema, update_time_range};
use crate::runtime::operators::aggregate::window_aggregate_operator::WindowAggregateSpec;
use crate::runtime::operators::operator::{BoxedOperator, OperatorTrait, PollResult, Readiness};
use crate::runtime::runtime_context::OperatorContext;
use crate::runtime::window::{init_time_range_iterator, TimeRangeIterator};

/// Same shape as [`WindowAggregateSpec`]; aggregations normally use the
/// `intermediate` or `final` step.
pub type MergeAggregateSpec = WindowAggregateSpec;

/// Merges pre-aggregated blocks from several children, one block per child
/// per window.
///
/// A round only runs once every unfinished child holds a block. Rows outside
/// the active window are neither aggregated nor trusted to belong to it.
#[derive(Debug)]
pub struct MergeAggregateOperator {
    context: OperatorContext,
    children: Vec<BoxedOperator>,
    aggregators: Vec<Aggregator>,
    time_range_iterator: Box<dyn TimeRangeIterator>,
    ascending: bool,
    schema: SchemaRef,
    builder: ResultBlockBuilder,
    cur_range: Option<TimeRange>,
    inputs: Vec<Option<TsBlock>>,
    can_call_next: Vec<bool>,
    input_finished: Vec<bool>,
    closed: bool,
}

impl MergeAggregateOperator {
    pub fn try_new(context: OperatorContext, children: Vec<BoxedOperator>, spec: &MergeAggregateSpec) -> Result<Self> {
        let input_schema = children
            .first()
            .map(|child| child.schema())
            .ok_or_else(|| ExecutionError::InvalidConfig("merge aggregate needs at least one child".to_string()))?;
        for (index, child) in children.iter().enumerate().skip(1) {
            let schema = child.schema();
            let same_types = schema.fields().len() == input_schema.fields().len()
                && schema
                    .fields()
                    .iter()
                    .zip(input_schema.fields().iter())
                    .all(|(a, b)| a.data_type() == b.data_type());
            if !same_types {
                return Err(ExecutionError::InvalidConfig(format!(
                    "child {index} column types differ from child 0"
                )));
            }
        }

        let aggregators = spec.build_aggregators(&input_schema)?;
        let time_range_iterator =
            init_time_range_iterator(spec.group_by_time.as_ref(), spec.ascending, spec.output_partial_window)?;
        Ok(Self::new(context, children, aggregators, time_range_iterator))
    }

    pub fn new(
        context: OperatorContext,
        children: Vec<BoxedOperator>,
        aggregators: Vec<Aggregator>,
        time_range_iterator: Box<dyn TimeRangeIterator>,
    ) -> Self {
        let schema = create_output_schema(&aggregators);
        let builder = ResultBlockBuilder::new(schema.clone(), context.config());
        let count = children.len();
        Self {
            ascending: time_range_iterator.is_ascending(),
            context,
            children,
            aggregators,
            time_range_iterator,
            schema,
            builder,
            cur_range: None,
            inputs: vec![None; count],
            can_call_next: vec![true; count],
            input_finished: vec![false; count],
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ExecutionError::protocol(self.context.operator_name(), "next() after close()"));
        }
        Ok(())
    }

    fn awaits_input(&self, index: usize) -> bool {
        self.inputs[index].is_none() && !self.input_finished[index]
    }

    /// Fills every empty slot of an unfinished child. Returns false when some
    /// child cannot supply a block this round.
    fn prepare_input(&mut self) -> Result<bool> {
        for index in 0..self.children.len() {
            if !self.awaits_input(index) {
                continue;
            }
            if !self.children[index].has_next()? {
                self.input_finished[index] = true;
                continue;
            }
            if !self.can_call_next[index] {
                return Ok(false);
            }
            self.can_call_next[index] = false;

            match self.children[index].next()? {
                PollResult::Ready(block) if !block.is_empty() => {
                    block.check_scan_order(self.ascending)?;
                    trace!(operator = self.context.operator_name(), child = index, rows = block.num_rows(), "pulled block");
                    self.inputs[index] = Some(block);
                }
                PollResult::Ready(_) | PollResult::NotReady => return Ok(false),
                PollResult::EndOfStream => self.input_finished[index] = true,
            }
        }
        Ok(true)
    }

    fn calculate_next_aggregation_result(&mut self, range: &TimeRange) -> Result<()> {
        let blocks: Vec<TsBlock> = self.inputs.iter().flatten().cloned().collect();
        for aggregator in self.aggregators.iter_mut() {
            aggregator.process_blocks(&blocks)?;
        }

        for slot in self.inputs.iter_mut() {
            if let Some(block) = slot.take() {
                let remaining = skip_past_time_range(&block, range, self.ascending);
                if !remaining.is_empty() {
                    *slot = Some(remaining);
                }
            }
        }

        self.cur_range = None;
        let output_time = self.time_range_iterator.current_output_time();
        append_aggregation_result(&mut self.builder, output_time, &self.aggregators)?;
        debug!(operator = self.context.operator_name(), window = %range, output_time, "window closed");
        Ok(())
    }
}

impl OperatorTrait for MergeAggregateOperator {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Readiness of the first unfinished child that is still blocked.
    fn is_blocked(&mut self) -> Readiness {
        if self.closed {
            return Readiness::ready();
        }
        for index in 0..self.children.len() {
            if self.input_finished[index] {
                continue;
            }
            let readiness = self.children[index].is_blocked();
            if !readiness.is_ready() {
                return readiness;
            }
        }
        Readiness::ready()
    }

    fn has_next(&self) -> Result<bool> {
        Ok(!self.closed && (self.cur_range.is_some() || self.time_range_iterator.has_next_time_range()))
    }

    fn next(&mut self) -> Result<PollResult> {
        self.ensure_open()?;
        self.builder.reset();
        self.can_call_next.fill(true);

        while (self.cur_range.is_some() || self.time_range_iterator.has_next_time_range()) && !self.builder.is_full() {
            if !self.prepare_input()? {
                debug!(operator = self.context.operator_name(), "waiting for input");
                break;
            }

            let range = match self.cur_range {
                Some(range) => range,
                None => {
                    let Some(range) = self.time_range_iterator.next_time_range() else {
                        break;
                    };
                    update_time_range(&mut self.aggregators, range);
                    self.cur_range = Some(range);
                    range
                }
            };
            self.calculate_next_aggregation_result(&range)?;
        }

        if !self.builder.is_empty() {
            return Ok(PollResult::Ready(self.builder.build()?));
        }
        if self.has_next()? {
            Ok(PollResult::NotReady)
        } else {
            Ok(PollResult::EndOfStream)
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inputs.iter_mut().for_each(|slot| *slot = None);
        self.cur_range = None;
        info!(
            operator = self.context.operator_name(),
            operator_id = self.context.operator_id(),
            children = self.children.len(),
            "closing merge aggregate"
        );

        let mut first_error = None;
        for child in self.children.iter_mut() {
            if let Err(e) = child.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
