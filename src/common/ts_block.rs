use std::ops::Range;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::{TimeRange, Timestamp};

pub const TIME_COLUMN: &str = "time";

/// A columnar block of timestamped rows.
///
/// Column 0 is always the non-null `Int64` time column, value columns follow.
/// Slicing shares the underlying Arrow buffers, so carrying the unconsumed
/// tail of a block between calls never copies row data.
#[derive(Debug, Clone)]
pub struct TsBlock {
    record_batch: RecordBatch,
}

impl TsBlock {
    pub fn try_new(record_batch: RecordBatch) -> Result<Self> {
        if record_batch.num_columns() == 0 {
            return Err(ExecutionError::MalformedBlock("block has no time column".to_string()));
        }
        let time_column = record_batch.column(0);
        if time_column.data_type() != &DataType::Int64 {
            return Err(ExecutionError::MalformedBlock(format!(
                "time column must be Int64, got {}",
                time_column.data_type()
            )));
        }
        if time_column.null_count() > 0 {
            return Err(ExecutionError::MalformedBlock("time column contains nulls".to_string()));
        }
        Ok(Self { record_batch })
    }

    /// Builds a block from a time vector and named value columns.
    pub fn from_columns(times: Vec<Timestamp>, values: Vec<(&str, ArrayRef)>) -> Result<Self> {
        let mut fields = vec![Field::new(TIME_COLUMN, DataType::Int64, false)];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(times))];
        for (name, array) in values {
            fields.push(Field::new(name, array.data_type().clone(), true));
            columns.push(array);
        }
        let record_batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Self::try_new(record_batch)
    }

    pub fn schema(&self) -> SchemaRef {
        self.record_batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.record_batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.record_batch.num_rows() == 0
    }

    pub fn time_column(&self) -> &Int64Array {
        self.record_batch.column(0).as_primitive::<Int64Type>()
    }

    pub fn times(&self) -> &[Timestamp] {
        self.time_column().values()
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.times().first().copied()
    }

    pub fn column(&self, index: usize) -> &ArrayRef {
        self.record_batch.column(index)
    }

    pub fn num_columns(&self) -> usize {
        self.record_batch.num_columns()
    }

    pub fn slice(&self, offset: usize, length: usize) -> TsBlock {
        Self {
            record_batch: self.record_batch.slice(offset, length),
        }
    }

    /// View of the rows from `offset` (inclusive) to the end.
    pub fn slice_from(&self, offset: usize) -> TsBlock {
        let offset = offset.min(self.num_rows());
        self.slice(offset, self.num_rows() - offset)
    }

    pub fn check_scan_order(&self, ascending: bool) -> Result<()> {
        let times = self.times();
        for row in 1..times.len() {
            let ordered = if ascending {
                times[row - 1] <= times[row]
            } else {
                times[row - 1] >= times[row]
            };
            if !ordered {
                return Err(ExecutionError::ScanOrder {
                    expected: if ascending { "ascending" } else { "descending" },
                    row: row - 1,
                    next_row: row,
                });
            }
        }
        Ok(())
    }
}

/// Rows of `times` that fall inside `range`, assuming `times` follows the scan
/// direction.
pub fn rows_within(times: &[Timestamp], range: &TimeRange, ascending: bool) -> Range<usize> {
    if ascending {
        let start = times.partition_point(|t| *t < range.min);
        let end = times.partition_point(|t| *t <= range.max);
        start..end.max(start)
    } else {
        let start = times.partition_point(|t| *t > range.max);
        let end = times.partition_point(|t| *t >= range.min);
        start..end.max(start)
    }
}

/// Drops the leading rows that precede `range` in scan direction.
pub fn skip_to_time_range(block: &TsBlock, range: &TimeRange, ascending: bool) -> TsBlock {
    let times = block.times();
    let offset = if ascending {
        times.partition_point(|t| *t < range.min)
    } else {
        times.partition_point(|t| *t > range.max)
    };
    block.slice_from(offset)
}

/// Drops every leading row up to and including the end of `range` in scan
/// direction, leaving only rows that belong to later windows.
pub fn skip_past_time_range(block: &TsBlock, range: &TimeRange, ascending: bool) -> TsBlock {
    let times = block.times();
    let offset = if ascending {
        times.partition_point(|t| *t <= range.max)
    } else {
        times.partition_point(|t| *t >= range.min)
    };
    block.slice_from(offset)
}
