use std::cmp::Ordering;
use std::fmt;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{self, cast};
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use datafusion::scalar::ScalarValue;

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::Timestamp;

/// Running state of one aggregate function inside the current window.
pub trait Accumulator: Send + fmt::Debug {
    fn reset(&mut self);

    /// Folds raw rows in; `times[i]` is the timestamp of `values[i]`.
    fn add_input(&mut self, times: &[Timestamp], values: &ArrayRef) -> Result<()>;

    /// Folds one intermediate row in, one scalar per intermediate column.
    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()>;

    /// Once true, further rows of the same window cannot change the result.
    fn has_final_result(&self) -> bool {
        false
    }

    fn intermediate_types(&self) -> Vec<DataType>;

    fn final_type(&self) -> DataType;

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>>;

    fn output_final(&self) -> Result<ScalarValue>;
}

fn to_f64(values: &ArrayRef) -> Result<ArrayRef> {
    Ok(cast(values, &DataType::Float64)?)
}

fn scalar_as_f64(value: &ScalarValue) -> Result<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    let array = to_f64(&value.to_array_of_size(1)?)?;
    Ok(Some(array.as_primitive::<Float64Type>().value(0)))
}

fn scalar_as_i64(value: &ScalarValue) -> Result<Option<i64>> {
    if value.is_null() {
        return Ok(None);
    }
    let array = cast(&value.to_array_of_size(1)?, &DataType::Int64)?;
    Ok(Some(array.as_primitive::<Int64Type>().value(0)))
}

fn expect_columns(partial: &[ScalarValue], expected: usize, function: &str) -> Result<()> {
    if partial.len() != expected {
        return Err(ExecutionError::MalformedBlock(format!(
            "{function} expects {expected} intermediate columns, got {}",
            partial.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct CountAccumulator {
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn reset(&mut self) {
        self.count = 0;
    }

    fn add_input(&mut self, _times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        self.count += (values.len() - values.null_count()) as i64;
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 1, "count")?;
        self.count += scalar_as_i64(&partial[0])?.unwrap_or(0);
        Ok(())
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![DataType::Int64]
    }

    fn final_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![ScalarValue::Int64(Some(self.count))])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        Ok(ScalarValue::Int64(Some(self.count)))
    }
}

#[derive(Debug, Default)]
pub struct SumAccumulator {
    sum: Option<f64>,
}

impl SumAccumulator {
    fn add(&mut self, value: f64) {
        self.sum = Some(self.sum.unwrap_or(0.0) + value);
    }
}

impl Accumulator for SumAccumulator {
    fn reset(&mut self) {
        self.sum = None;
    }

    fn add_input(&mut self, _times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        let values = to_f64(values)?;
        if let Some(sum) = compute::sum(values.as_primitive::<Float64Type>()) {
            self.add(sum);
        }
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 1, "sum")?;
        if let Some(sum) = scalar_as_f64(&partial[0])? {
            self.add(sum);
        }
        Ok(())
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![DataType::Float64]
    }

    fn final_type(&self) -> DataType {
        DataType::Float64
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![ScalarValue::Float64(self.sum)])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        Ok(ScalarValue::Float64(self.sum))
    }
}

#[derive(Debug, Default)]
pub struct AvgAccumulator {
    count: i64,
    sum: f64,
}

impl Accumulator for AvgAccumulator {
    fn reset(&mut self) {
        self.count = 0;
        self.sum = 0.0;
    }

    fn add_input(&mut self, _times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        let values = to_f64(values)?;
        let values = values.as_primitive::<Float64Type>();
        self.count += (values.len() - values.null_count()) as i64;
        self.sum += compute::sum(values).unwrap_or(0.0);
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 2, "avg")?;
        let count = scalar_as_i64(&partial[0])?.unwrap_or(0);
        if count > 0 {
            self.count += count;
            self.sum += scalar_as_f64(&partial[1])?.unwrap_or(0.0);
        }
        Ok(())
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![DataType::Int64, DataType::Float64]
    }

    fn final_type(&self) -> DataType {
        DataType::Float64
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![
            ScalarValue::Int64(Some(self.count)),
            ScalarValue::Float64(Some(self.sum)),
        ])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        if self.count == 0 {
            return Ok(ScalarValue::Float64(None));
        }
        Ok(ScalarValue::Float64(Some(self.sum / self.count as f64)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

/// `min_value` / `max_value`; keeps the input type.
#[derive(Debug)]
pub struct ExtremumAccumulator {
    extremum: Extremum,
    data_type: DataType,
    value: Option<ScalarValue>,
}

impl ExtremumAccumulator {
    pub fn new(extremum: Extremum, data_type: DataType) -> Self {
        Self {
            extremum,
            data_type,
            value: None,
        }
    }

    fn offer(&mut self, candidate: ScalarValue) {
        if candidate.is_null() {
            return;
        }
        let wanted = match self.extremum {
            Extremum::Min => Ordering::Less,
            Extremum::Max => Ordering::Greater,
        };
        let replace = match &self.value {
            None => true,
            Some(current) => candidate.partial_cmp(current) == Some(wanted),
        };
        if replace {
            self.value = Some(candidate);
        }
    }

    fn output(&self) -> Result<ScalarValue> {
        match &self.value {
            Some(value) => Ok(value.clone()),
            None => Ok(ScalarValue::try_from(&self.data_type)?),
        }
    }
}

impl Accumulator for ExtremumAccumulator {
    fn reset(&mut self) {
        self.value = None;
    }

    fn add_input(&mut self, _times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        for row in 0..values.len() {
            if values.is_valid(row) {
                self.offer(ScalarValue::try_from_array(values.as_ref(), row)?);
            }
        }
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 1, "min_value/max_value")?;
        self.offer(partial[0].clone());
        Ok(())
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![self.data_type.clone()]
    }

    fn final_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![self.output()?])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        self.output()
    }
}

/// Value with the largest magnitude; on equal magnitude the positive one wins.
#[derive(Debug)]
pub struct ExtremeAccumulator {
    data_type: DataType,
    value: Option<(f64, ScalarValue)>,
}

impl ExtremeAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type, value: None }
    }

    fn offer(&mut self, raw: f64, value: ScalarValue) {
        let replace = match &self.value {
            None => true,
            Some((current, _)) => {
                raw.abs() > current.abs() || (raw.abs() == current.abs() && raw > *current)
            }
        };
        if replace {
            self.value = Some((raw, value));
        }
    }

    fn output(&self) -> Result<ScalarValue> {
        match &self.value {
            Some((_, value)) => Ok(value.clone()),
            None => Ok(ScalarValue::try_from(&self.data_type)?),
        }
    }
}

impl Accumulator for ExtremeAccumulator {
    fn reset(&mut self) {
        self.value = None;
    }

    fn add_input(&mut self, _times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        let as_f64 = to_f64(values)?;
        let as_f64 = as_f64.as_primitive::<Float64Type>();
        for row in 0..values.len() {
            if values.is_valid(row) {
                self.offer(as_f64.value(row), ScalarValue::try_from_array(values.as_ref(), row)?);
            }
        }
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 1, "extreme")?;
        if let Some(raw) = scalar_as_f64(&partial[0])? {
            self.offer(raw, partial[0].clone());
        }
        Ok(())
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![self.data_type.clone()]
    }

    fn final_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![self.output()?])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        self.output()
    }
}

/// Which end of the window a positional accumulator tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
}

impl Position {
    fn prefers(&self, candidate: Timestamp, current: Timestamp) -> bool {
        match self {
            Position::First => candidate < current,
            Position::Last => candidate > current,
        }
    }

    /// The scan direction in which the first qualifying row seen is final.
    fn saturates_when_ascending(&self) -> bool {
        matches!(self, Position::First)
    }

    /// Row of a scan-ordered slice closest to the tracked end.
    fn pick(&self, valid_rows: impl DoubleEndedIterator<Item = usize>, ascending: bool) -> Option<usize> {
        let mut valid_rows = valid_rows;
        if self.saturates_when_ascending() == ascending {
            valid_rows.next()
        } else {
            valid_rows.next_back()
        }
    }
}

/// `first_value` / `last_value`.
#[derive(Debug)]
pub struct PositionalValueAccumulator {
    position: Position,
    ascending: bool,
    data_type: DataType,
    current: Option<(Timestamp, ScalarValue)>,
}

impl PositionalValueAccumulator {
    pub fn new(position: Position, data_type: DataType, ascending: bool) -> Self {
        Self {
            position,
            ascending,
            data_type,
            current: None,
        }
    }

    fn offer(&mut self, time: Timestamp, value: ScalarValue) {
        let replace = match &self.current {
            None => true,
            Some((current, _)) => self.position.prefers(time, *current),
        };
        if replace {
            self.current = Some((time, value));
        }
    }
}

impl Accumulator for PositionalValueAccumulator {
    fn reset(&mut self) {
        self.current = None;
    }

    fn add_input(&mut self, times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        if self.has_final_result() {
            return Ok(());
        }
        let valid_rows = (0..values.len()).filter(|row| values.is_valid(*row));
        if let Some(row) = self.position.pick(valid_rows, self.ascending) {
            self.offer(times[row], ScalarValue::try_from_array(values.as_ref(), row)?);
        }
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 2, "first_value/last_value")?;
        if partial[0].is_null() {
            return Ok(());
        }
        if let Some(time) = scalar_as_i64(&partial[1])? {
            self.offer(time, partial[0].clone());
        }
        Ok(())
    }

    fn has_final_result(&self) -> bool {
        self.current.is_some() && self.position.saturates_when_ascending() == self.ascending
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![self.data_type.clone(), DataType::Int64]
    }

    fn final_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        match &self.current {
            Some((time, value)) => Ok(vec![value.clone(), ScalarValue::Int64(Some(*time))]),
            None => Ok(vec![ScalarValue::try_from(&self.data_type)?, ScalarValue::Int64(None)]),
        }
    }

    fn output_final(&self) -> Result<ScalarValue> {
        match &self.current {
            Some((_, value)) => Ok(value.clone()),
            None => Ok(ScalarValue::try_from(&self.data_type)?),
        }
    }
}

/// `min_time` / `max_time`: timestamp of the first or last non-null value.
#[derive(Debug)]
pub struct PositionalTimeAccumulator {
    position: Position,
    ascending: bool,
    time: Option<Timestamp>,
}

impl PositionalTimeAccumulator {
    pub fn new(position: Position, ascending: bool) -> Self {
        Self {
            position,
            ascending,
            time: None,
        }
    }

    fn offer(&mut self, time: Timestamp) {
        match self.time {
            Some(current) if !self.position.prefers(time, current) => {}
            _ => self.time = Some(time),
        }
    }
}

impl Accumulator for PositionalTimeAccumulator {
    fn reset(&mut self) {
        self.time = None;
    }

    fn add_input(&mut self, times: &[Timestamp], values: &ArrayRef) -> Result<()> {
        if self.has_final_result() {
            return Ok(());
        }
        let valid_rows = (0..values.len()).filter(|row| values.is_valid(*row));
        if let Some(row) = self.position.pick(valid_rows, self.ascending) {
            self.offer(times[row]);
        }
        Ok(())
    }

    fn add_intermediate(&mut self, partial: &[ScalarValue]) -> Result<()> {
        expect_columns(partial, 1, "min_time/max_time")?;
        if let Some(time) = scalar_as_i64(&partial[0])? {
            self.offer(time);
        }
        Ok(())
    }

    fn has_final_result(&self) -> bool {
        self.time.is_some() && self.position.saturates_when_ascending() == self.ascending
    }

    fn intermediate_types(&self) -> Vec<DataType> {
        vec![DataType::Int64]
    }

    fn final_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_intermediate(&self) -> Result<Vec<ScalarValue>> {
        Ok(vec![ScalarValue::Int64(self.time)])
    }

    fn output_final(&self) -> Result<ScalarValue> {
        Ok(ScalarValue::Int64(self.time))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float64Array, Int32Array, Int64Array};

    use super::*;

    fn f64s(values: Vec<Option<f64>>) -> ArrayRef {
        Arc::new(Float64Array::from(values))
    }

    #[test]
    fn test_count_skips_nulls_and_merges_partials() {
        let mut acc = CountAccumulator::default();
        acc.add_input(&[1, 2, 3], &f64s(vec![Some(1.0), None, Some(3.0)])).expect("input");
        acc.add_intermediate(&[ScalarValue::Int64(Some(4))]).expect("partial");
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Int64(Some(6)));
        acc.reset();
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Int64(Some(0)));
    }

    #[test]
    fn test_sum_of_nothing_is_null() {
        let mut acc = SumAccumulator::default();
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Float64(None));
        let ints: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        acc.add_input(&[0, 1, 2], &ints).expect("input");
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Float64(Some(6.0)));
    }

    #[test]
    fn test_avg_merges_count_and_sum() {
        let mut acc = AvgAccumulator::default();
        acc.add_input(&[0, 1], &f64s(vec![Some(1.0), Some(3.0)])).expect("input");
        acc.add_intermediate(&[ScalarValue::Int64(Some(2)), ScalarValue::Float64(Some(8.0))])
            .expect("partial");
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Float64(Some(3.0)));
        assert!(acc.add_intermediate(&[ScalarValue::Int64(Some(1))]).is_err());
    }

    #[test]
    fn test_min_max_keep_input_type() {
        let values: ArrayRef = Arc::new(Int64Array::from(vec![Some(4), None, Some(-2), Some(9)]));
        let mut min = ExtremumAccumulator::new(Extremum::Min, DataType::Int64);
        let mut max = ExtremumAccumulator::new(Extremum::Max, DataType::Int64);
        min.add_input(&[0, 1, 2, 3], &values).expect("input");
        max.add_input(&[0, 1, 2, 3], &values).expect("input");
        assert_eq!(min.output_final().expect("output"), ScalarValue::Int64(Some(-2)));
        assert_eq!(max.output_final().expect("output"), ScalarValue::Int64(Some(9)));

        min.reset();
        assert_eq!(min.output_final().expect("output"), ScalarValue::Int64(None));
    }

    #[test]
    fn test_extreme_prefers_positive_on_tie() {
        let mut acc = ExtremeAccumulator::new(DataType::Float64);
        acc.add_input(&[0, 1, 2], &f64s(vec![Some(-5.0), Some(3.0), Some(5.0)])).expect("input");
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Float64(Some(5.0)));
        acc.add_intermediate(&[ScalarValue::Float64(Some(-7.5))]).expect("partial");
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Float64(Some(-7.5)));
    }

    #[test]
    fn test_first_value_saturates_only_in_ascending_scan() {
        let values = f64s(vec![None, Some(2.0), Some(3.0)]);

        let mut asc = PositionalValueAccumulator::new(Position::First, DataType::Float64, true);
        asc.add_input(&[10, 11, 12], &values).expect("input");
        assert!(asc.has_final_result());
        assert_eq!(asc.output_final().expect("output"), ScalarValue::Float64(Some(2.0)));

        let mut desc = PositionalValueAccumulator::new(Position::First, DataType::Float64, false);
        desc.add_input(&[12, 11, 10], &f64s(vec![Some(3.0), Some(2.0), None])).expect("input");
        assert!(!desc.has_final_result());
        assert_eq!(desc.output_final().expect("output"), ScalarValue::Float64(Some(2.0)));
        desc.add_input(&[5], &f64s(vec![Some(-1.0)])).expect("input");
        assert_eq!(desc.output_final().expect("output"), ScalarValue::Float64(Some(-1.0)));
    }

    #[test]
    fn test_last_value_merges_by_time() {
        let mut acc = PositionalValueAccumulator::new(Position::Last, DataType::Float64, true);
        acc.add_intermediate(&[ScalarValue::Float64(Some(1.0)), ScalarValue::Int64(Some(7))])
            .expect("partial");
        acc.add_intermediate(&[ScalarValue::Float64(Some(2.0)), ScalarValue::Int64(Some(3))])
            .expect("partial");
        assert_eq!(
            acc.output_intermediate().expect("output"),
            vec![ScalarValue::Float64(Some(1.0)), ScalarValue::Int64(Some(7))]
        );
    }

    #[test]
    fn test_max_time_saturates_in_descending_scan() {
        let mut acc = PositionalTimeAccumulator::new(Position::Last, false);
        acc.add_input(&[9, 8], &f64s(vec![None, Some(1.0)])).expect("input");
        assert!(acc.has_final_result());
        assert_eq!(acc.output_final().expect("output"), ScalarValue::Int64(Some(8)));
    }
}
