use std::fmt;

use arrow::datatypes::SchemaRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::TimeRange;
use crate::common::ts_block::{skip_to_time_range, TsBlock};
use crate::runtime::functions::aggregate::{AggregationSpec, Aggregator};
use crate::runtime::operators::aggregate::result_builder::ResultBlockBuilder;
use crate::runtime::operators::aggregate::utils::{
    append_aggregation_result, create_output_schema, is_all_aggregators_final, update_time_range,
};
use crate::runtime::operators::operator::{BoxedOperator, OperatorTrait, PollResult, Readiness};
use crate::runtime::runtime_context::OperatorContext;
use crate::runtime::window::{init_time_range_iterator, GroupByTimeParameter, TimeRangeIterator};

fn default_ascending() -> bool {
    true
}

/// Aggregate expressions plus windowing, as handed over by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregateSpec {
    pub aggregations: Vec<AggregationSpec>,
    /// `None` aggregates the whole input into a single row.
    #[serde(default)]
    pub group_by_time: Option<GroupByTimeParameter>,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
    /// Whether the merge operator emits a window cut short by the end of the
    /// query range. Raw aggregation always emits it.
    #[serde(default)]
    pub output_partial_window: bool,
}

impl WindowAggregateSpec {
    pub fn new(aggregations: Vec<AggregationSpec>, group_by_time: Option<GroupByTimeParameter>) -> Self {
        Self {
            aggregations,
            group_by_time,
            ascending: true,
            output_partial_window: false,
        }
    }

    pub fn with_ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    pub fn with_output_partial_window(mut self, output_partial_window: bool) -> Self {
        self.output_partial_window = output_partial_window;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ExecutionError::InvalidConfig(e.to_string()))
    }

    pub(crate) fn build_aggregators(&self, input_schema: &SchemaRef) -> Result<Vec<Aggregator>> {
        if self.aggregations.is_empty() {
            return Err(ExecutionError::InvalidConfig("no aggregate expressions".to_string()));
        }
        self.aggregations
            .iter()
            .map(|spec| Aggregator::try_new(spec, input_schema, self.ascending))
            .collect()
    }
}

impl fmt::Display for WindowAggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<String> = self.aggregations.iter().map(|a| a.kind.to_string()).collect();
        write!(f, "{}", kinds.join(", "))
    }
}

/// Aggregates raw rows of one child window by window.
///
/// One input block may span several windows and one window may need several
/// blocks; the unconsumed tail of the last pulled block is kept in `cached`
/// between calls.
#[derive(Debug)]
pub struct WindowAggregateOperator {
    context: OperatorContext,
    child: BoxedOperator,
    aggregators: Vec<Aggregator>,
    time_range_iterator: Box<dyn TimeRangeIterator>,
    ascending: bool,
    schema: SchemaRef,
    builder: ResultBlockBuilder,
    cur_range: Option<TimeRange>,
    cached: Option<TsBlock>,
    can_call_next: bool,
    input_finished: bool,
    closed: bool,
}

impl WindowAggregateOperator {
    pub fn try_new(context: OperatorContext, child: BoxedOperator, spec: &WindowAggregateSpec) -> Result<Self> {
        let aggregators = spec.build_aggregators(&child.schema())?;
        let time_range_iterator = init_time_range_iterator(spec.group_by_time.as_ref(), spec.ascending, true)?;
        Ok(Self::new(context, child, aggregators, time_range_iterator))
    }

    /// Aggregators must have been built for the iterator's scan direction.
    pub fn new(
        context: OperatorContext,
        child: BoxedOperator,
        aggregators: Vec<Aggregator>,
        time_range_iterator: Box<dyn TimeRangeIterator>,
    ) -> Self {
        let schema = create_output_schema(&aggregators);
        let builder = ResultBlockBuilder::new(schema.clone(), context.config());
        Self {
            ascending: time_range_iterator.is_ascending(),
            context,
            child,
            aggregators,
            time_range_iterator,
            schema,
            builder,
            cur_range: None,
            cached: None,
            can_call_next: true,
            input_finished: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ExecutionError::protocol(self.context.operator_name(), "next() after close()"));
        }
        Ok(())
    }

    fn child_has_next(&self) -> Result<bool> {
        Ok(!self.input_finished && self.child.has_next()?)
    }

    /// Feeds the active window until it is resolved. Returns false when the
    /// child must be waited on first.
    fn aggregate_window(&mut self, range: &TimeRange) -> Result<bool> {
        while !self.calculate_from_cached_data(range)? {
            self.cached = None;
            if !self.child_has_next()? {
                // input exhausted, emit what the window has
                break;
            }
            if !self.can_call_next {
                return Ok(false);
            }
            self.can_call_next = false;
            self.pull_child()?;
        }
        Ok(true)
    }

    /// True once the window cannot receive more rows: the cached rows already
    /// lie past it, or every aggregator is saturated.
    fn calculate_from_cached_data(&mut self, range: &TimeRange) -> Result<bool> {
        if is_all_aggregators_final(&self.aggregators) {
            return Ok(true);
        }
        let block = match self.cached.take() {
            Some(block) if !block.is_empty() => block,
            _ => return Ok(false),
        };

        let block = skip_to_time_range(&block, range, self.ascending);
        let mut consumed = 0;
        for aggregator in self.aggregators.iter_mut().filter(|a| !a.has_final_result()) {
            consumed = consumed.max(aggregator.process_block(&block)?);
        }

        let tail = block.slice_from(consumed);
        let passed_window = tail
            .start_time()
            .is_some_and(|time| range.is_passed_by(time, self.ascending));
        if !tail.is_empty() {
            self.cached = Some(tail);
        }
        Ok(passed_window || is_all_aggregators_final(&self.aggregators))
    }

    fn pull_child(&mut self) -> Result<()> {
        match self.child.next()? {
            PollResult::Ready(block) => {
                block.check_scan_order(self.ascending)?;
                trace!(operator = self.context.operator_name(), rows = block.num_rows(), "pulled block");
                if !block.is_empty() {
                    self.cached = Some(block);
                }
            }
            PollResult::NotReady => {
                trace!(operator = self.context.operator_name(), "child not ready");
            }
            PollResult::EndOfStream => {
                self.input_finished = true;
            }
        }
        Ok(())
    }
}

impl OperatorTrait for WindowAggregateOperator {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn is_blocked(&mut self) -> Readiness {
        if self.closed || self.input_finished {
            return Readiness::ready();
        }
        self.child.is_blocked()
    }

    fn has_next(&self) -> Result<bool> {
        Ok(!self.closed && (self.cur_range.is_some() || self.time_range_iterator.has_next_time_range()))
    }

    fn next(&mut self) -> Result<PollResult> {
        self.ensure_open()?;
        self.builder.reset();
        self.can_call_next = true;

        while (self.cur_range.is_some() || self.time_range_iterator.has_next_time_range()) && !self.builder.is_full() {
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

            if !self.aggregate_window(&range)? {
                debug!(operator = self.context.operator_name(), window = %range, "waiting for input");
                break;
            }

            self.cur_range = None;
            let output_time = self.time_range_iterator.current_output_time();
            append_aggregation_result(&mut self.builder, output_time, &self.aggregators)?;
            debug!(operator = self.context.operator_name(), window = %range, output_time, "window closed");
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
        self.cached = None;
        self.cur_range = None;
        info!(
            operator = self.context.operator_name(),
            operator_id = self.context.operator_id(),
            "closing window aggregate"
        );
        self.child.close()
    }
}
