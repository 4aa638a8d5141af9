use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use arrow::datatypes::{DataType, Field, Schema};
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::TimeRange;
use crate::common::ts_block::{rows_within, TsBlock};
use crate::runtime::functions::aggregate::accumulator::{
    Accumulator, AvgAccumulator, CountAccumulator, ExtremeAccumulator, Extremum, ExtremumAccumulator,
    Position, PositionalTimeAccumulator, PositionalValueAccumulator, SumAccumulator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Count,
    Sum,
    Avg,
    Extreme,
    MinValue,
    MaxValue,
    MinTime,
    MaxTime,
    FirstValue,
    LastValue,
}

impl AggregationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationKind::Count => "count",
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Extreme => "extreme",
            AggregationKind::MinValue => "min_value",
            AggregationKind::MaxValue => "max_value",
            AggregationKind::MinTime => "min_time",
            AggregationKind::MaxTime => "max_time",
            AggregationKind::FirstValue => "first_value",
            AggregationKind::LastValue => "last_value",
        }
    }

    /// Column name suffixes of the intermediate layout, empty when it has a
    /// single column.
    fn intermediate_suffixes(&self) -> &'static [&'static str] {
        match self {
            AggregationKind::Avg => &["count", "sum"],
            AggregationKind::FirstValue | AggregationKind::LastValue => &["value", "time"],
            _ => &[],
        }
    }

    fn requires_numeric_input(&self) -> bool {
        matches!(
            self,
            AggregationKind::Sum | AggregationKind::Avg | AggregationKind::Extreme
        )
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregationKind {
    type Err = ExecutionError;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name.to_lowercase().as_str() {
            "count" => AggregationKind::Count,
            "sum" => AggregationKind::Sum,
            "avg" => AggregationKind::Avg,
            "extreme" => AggregationKind::Extreme,
            "min_value" | "min" => AggregationKind::MinValue,
            "max_value" | "max" => AggregationKind::MaxValue,
            "min_time" => AggregationKind::MinTime,
            "max_time" => AggregationKind::MaxTime,
            "first_value" | "first" => AggregationKind::FirstValue,
            "last_value" | "last" => AggregationKind::LastValue,
            other => {
                return Err(ExecutionError::Unsupported(format!(
                    "aggregate function {other}"
                )))
            }
        };
        Ok(kind)
    }
}

/// Where an aggregator sits in a two-phase aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStep {
    /// Raw input, final output.
    #[default]
    Single,
    /// Raw input, intermediate output.
    Partial,
    /// Intermediate input, intermediate output.
    Intermediate,
    /// Intermediate input, final output.
    Final,
}

impl AggregationStep {
    pub fn input_is_raw(&self) -> bool {
        matches!(self, AggregationStep::Single | AggregationStep::Partial)
    }

    pub fn output_is_final(&self) -> bool {
        matches!(self, AggregationStep::Single | AggregationStep::Final)
    }
}

pub fn create_accumulator(
    kind: AggregationKind,
    value_type: &DataType,
    ascending: bool,
) -> Result<Box<dyn Accumulator>> {
    if kind.requires_numeric_input() && !value_type.is_numeric() {
        return Err(ExecutionError::Unsupported(format!(
            "{kind} over {value_type}"
        )));
    }
    let accumulator: Box<dyn Accumulator> = match kind {
        AggregationKind::Count => Box::new(CountAccumulator::default()),
        AggregationKind::Sum => Box::new(SumAccumulator::default()),
        AggregationKind::Avg => Box::new(AvgAccumulator::default()),
        AggregationKind::Extreme => Box::new(ExtremeAccumulator::new(value_type.clone())),
        AggregationKind::MinValue => Box::new(ExtremumAccumulator::new(Extremum::Min, value_type.clone())),
        AggregationKind::MaxValue => Box::new(ExtremumAccumulator::new(Extremum::Max, value_type.clone())),
        AggregationKind::MinTime => Box::new(PositionalTimeAccumulator::new(Position::First, ascending)),
        AggregationKind::MaxTime => Box::new(PositionalTimeAccumulator::new(Position::Last, ascending)),
        AggregationKind::FirstValue => {
            Box::new(PositionalValueAccumulator::new(Position::First, value_type.clone(), ascending))
        }
        AggregationKind::LastValue => {
            Box::new(PositionalValueAccumulator::new(Position::Last, value_type.clone(), ascending))
        }
    };
    Ok(accumulator)
}

/// Planner-facing description of one aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub kind: AggregationKind,
    #[serde(default)]
    pub step: AggregationStep,
    /// Raw steps read one value column, intermediate steps one column per
    /// intermediate field.
    pub input_columns: Vec<usize>,
    #[serde(default)]
    pub name: Option<String>,
}

impl AggregationSpec {
    pub fn new(kind: AggregationKind, step: AggregationStep, input_columns: Vec<usize>) -> Self {
        Self {
            kind,
            step,
            input_columns,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One aggregate expression evaluated window by window.
#[derive(Debug)]
pub struct Aggregator {
    name: String,
    kind: AggregationKind,
    step: AggregationStep,
    input_columns: Vec<usize>,
    accumulator: Box<dyn Accumulator>,
    ascending: bool,
    time_range: TimeRange,
}

impl Aggregator {
    pub fn try_new(spec: &AggregationSpec, input_schema: &Schema, ascending: bool) -> Result<Self> {
        let first_column = *spec.input_columns.first().ok_or_else(|| {
            ExecutionError::InvalidConfig(format!("{} has no input column", spec.kind))
        })?;
        let value_type = input_schema
            .fields()
            .get(first_column)
            .map(|field| field.data_type().clone())
            .ok_or_else(|| {
                ExecutionError::InvalidConfig(format!(
                    "{} reads column {first_column}, input has {} columns",
                    spec.kind,
                    input_schema.fields().len()
                ))
            })?;
        let accumulator = create_accumulator(spec.kind, &value_type, ascending)?;

        let expected_inputs = if spec.step.input_is_raw() {
            1
        } else {
            accumulator.intermediate_types().len()
        };
        if spec.input_columns.len() != expected_inputs {
            return Err(ExecutionError::InvalidConfig(format!(
                "{} at step {:?} needs {expected_inputs} input columns, got {}",
                spec.kind,
                spec.step,
                spec.input_columns.len()
            )));
        }

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}({})", spec.kind, input_schema.field(first_column).name()));
        Ok(Self {
            name,
            kind: spec.kind,
            step: spec.step,
            input_columns: spec.input_columns.clone(),
            accumulator,
            ascending,
            time_range: TimeRange::new(i64::MIN, i64::MAX),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn step(&self) -> AggregationStep {
        self.step
    }

    /// Moves to a new window and clears the previous window's state.
    pub fn update_time_range(&mut self, time_range: TimeRange) {
        self.time_range = time_range;
        self.accumulator.reset();
    }

    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    pub fn has_final_result(&self) -> bool {
        self.accumulator.has_final_result()
    }

    /// Consumes the rows of `block` inside the current window and returns the
    /// index one past the last of them.
    pub fn process_block(&mut self, block: &TsBlock) -> Result<usize> {
        let rows = rows_within(block.times(), &self.time_range, self.ascending);
        let end = rows.end;
        self.fold_rows(block, rows)?;
        Ok(end)
    }

    /// Consumes the in-window rows of several inputs at once.
    pub fn process_blocks(&mut self, blocks: &[TsBlock]) -> Result<()> {
        for block in blocks {
            let rows = rows_within(block.times(), &self.time_range, self.ascending);
            self.fold_rows(block, rows)?;
        }
        Ok(())
    }

    fn fold_rows(&mut self, block: &TsBlock, rows: Range<usize>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(missing) = self.input_columns.iter().find(|c| **c >= block.num_columns()) {
            return Err(ExecutionError::MalformedBlock(format!(
                "{} reads column {missing}, block has {} columns",
                self.name,
                block.num_columns()
            )));
        }

        if self.step.input_is_raw() {
            let values = block.column(self.input_columns[0]).slice(rows.start, rows.len());
            let times = &block.times()[rows];
            return self.accumulator.add_input(times, &values);
        }

        for row in rows {
            let partial = self
                .input_columns
                .iter()
                .map(|column| ScalarValue::try_from_array(block.column(*column).as_ref(), row))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            self.accumulator.add_intermediate(&partial)?;
        }
        Ok(())
    }

    pub fn output_types(&self) -> Vec<DataType> {
        if self.step.output_is_final() {
            vec![self.accumulator.final_type()]
        } else {
            self.accumulator.intermediate_types()
        }
    }

    pub fn output_fields(&self) -> Vec<Field> {
        let types = self.output_types();
        if types.len() == 1 {
            return vec![Field::new(self.name.clone(), types[0].clone(), true)];
        }
        let suffixes = self.kind.intermediate_suffixes();
        types
            .into_iter()
            .enumerate()
            .map(|(i, data_type)| {
                let suffix = suffixes.get(i).copied().unwrap_or("value");
                Field::new(format!("{}.{}", self.name, suffix), data_type, true)
            })
            .collect()
    }

    /// Result of the current window, one scalar per output column.
    pub fn output(&self) -> Result<Vec<ScalarValue>> {
        if self.step.output_is_final() {
            Ok(vec![self.accumulator.output_final()?])
        } else {
            self.accumulator.output_intermediate()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float64Array, Int64Array};

    use super::*;

    fn raw_block(times: Vec<i64>) -> TsBlock {
        let values: Vec<f64> = times.iter().map(|t| *t as f64).collect();
        TsBlock::from_columns(times, vec![("s1", Arc::new(Float64Array::from(values)))]).expect("block")
    }

    #[test]
    fn test_parse_aggregation_names() {
        assert_eq!("COUNT".parse::<AggregationKind>().expect("kind"), AggregationKind::Count);
        assert_eq!("max".parse::<AggregationKind>().expect("kind"), AggregationKind::MaxValue);
        assert!("median".parse::<AggregationKind>().is_err());
    }

    #[test]
    fn test_process_block_stops_at_window_end() {
        let block = raw_block(vec![0, 1, 2, 3, 4, 5, 6]);
        let spec = AggregationSpec::new(AggregationKind::Sum, AggregationStep::Single, vec![1]);
        let mut agg = Aggregator::try_new(&spec, &block.schema(), true).expect("aggregator");
        agg.update_time_range(TimeRange::new(0, 4));
        assert_eq!(agg.process_block(&block).expect("process"), 5);
        assert_eq!(agg.output().expect("output"), vec![ScalarValue::Float64(Some(10.0))]);
        assert_eq!(agg.name(), "sum(s1)");

        agg.update_time_range(TimeRange::new(5, 9));
        assert_eq!(agg.output().expect("output"), vec![ScalarValue::Float64(None)]);
    }

    #[test]
    fn test_process_blocks_ignores_rows_outside_window() {
        let spec = AggregationSpec::new(AggregationKind::Count, AggregationStep::Single, vec![1]);
        let a = raw_block(vec![8, 9, 10, 11]);
        let b = raw_block(vec![10, 12, 20]);
        let mut agg = Aggregator::try_new(&spec, &a.schema(), true).expect("aggregator");
        agg.update_time_range(TimeRange::new(10, 19));
        agg.process_blocks(&[a, b]).expect("process");
        assert_eq!(agg.output().expect("output"), vec![ScalarValue::Int64(Some(4))]);
    }

    #[test]
    fn test_partial_avg_has_two_named_columns() {
        let block = raw_block(vec![0, 1]);
        let spec = AggregationSpec::new(AggregationKind::Avg, AggregationStep::Partial, vec![1]);
        let agg = Aggregator::try_new(&spec, &block.schema(), true).expect("aggregator");
        let names: Vec<String> = agg.output_fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["avg(s1).count", "avg(s1).sum"]);
    }

    #[test]
    fn test_final_step_reads_intermediate_columns() {
        let block = TsBlock::from_columns(
            vec![0, 0],
            vec![
                ("avg.count", Arc::new(Int64Array::from(vec![2, 3]))),
                ("avg.sum", Arc::new(Float64Array::from(vec![4.0, 6.0]))),
            ],
        )
        .expect("block");
        let spec = AggregationSpec::new(AggregationKind::Avg, AggregationStep::Final, vec![1, 2]);
        let mut agg = Aggregator::try_new(&spec, &block.schema(), true).expect("aggregator");
        agg.update_time_range(TimeRange::new(0, 9));
        agg.process_blocks(&[block]).expect("process");
        assert_eq!(agg.output().expect("output"), vec![ScalarValue::Float64(Some(2.0))]);
    }

    #[test]
    fn test_wrong_input_arity_is_rejected() {
        let block = raw_block(vec![0]);
        let spec = AggregationSpec::new(AggregationKind::Avg, AggregationStep::Final, vec![1]);
        assert!(matches!(
            Aggregator::try_new(&spec, &block.schema(), true),
            Err(ExecutionError::InvalidConfig(_))
        ));
    }
}
