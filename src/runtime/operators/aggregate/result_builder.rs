use std::mem;
use std::sync::Arc;

use arrow::array::{new_empty_array, ArrayRef, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::scalar::ScalarValue;

use crate::common::config::ExecutionConfig;
use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::Timestamp;
use crate::common::ts_block::TsBlock;

/// Collects finished window rows into one output block.
///
/// Capacity is checked before each window is started, so a block can end one
/// row past `max_bytes_per_block` but never past `max_rows_per_block`.
#[derive(Debug)]
pub struct ResultBlockBuilder {
    schema: SchemaRef,
    times: Vec<Timestamp>,
    columns: Vec<Vec<ScalarValue>>,
    max_rows: usize,
    max_bytes: usize,
    estimated_bytes: usize,
}

impl ResultBlockBuilder {
    pub fn new(schema: SchemaRef, config: &ExecutionConfig) -> Self {
        let value_columns = schema.fields().len().saturating_sub(1);
        Self {
            schema,
            times: Vec::new(),
            columns: vec![Vec::new(); value_columns],
            max_rows: config.max_rows_per_block.max(1),
            max_bytes: config.max_bytes_per_block.max(1),
            estimated_bytes: 0,
        }
    }

    pub fn reset(&mut self) {
        self.times.clear();
        self.columns.iter_mut().for_each(Vec::clear);
        self.estimated_bytes = 0;
    }

    pub fn num_rows(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.times.len() >= self.max_rows || self.estimated_bytes >= self.max_bytes
    }

    pub fn append_row(&mut self, time: Timestamp, values: Vec<ScalarValue>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(ExecutionError::MalformedBlock(format!(
                "result row has {} values, schema expects {}",
                values.len(),
                self.columns.len()
            )));
        }
        self.estimated_bytes += mem::size_of::<Timestamp>();
        for (column, value) in self.columns.iter_mut().zip(values) {
            self.estimated_bytes += value.size();
            column.push(value);
        }
        self.times.push(time);
        Ok(())
    }

    /// Materialises the buffered rows and leaves the builder empty.
    pub fn build(&mut self) -> Result<TsBlock> {
        let times = mem::take(&mut self.times);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        arrays.push(Arc::new(Int64Array::from(times)));

        for (index, column) in self.columns.iter_mut().enumerate() {
            let data_type = self.schema.field(index + 1).data_type();
            let values = mem::take(column);
            let array = if values.is_empty() {
                new_empty_array(data_type)
            } else {
                ScalarValue::iter_to_array(values)?
            };
            let array = if array.data_type() == data_type {
                array
            } else {
                cast(&array, data_type)?
            };
            arrays.push(array);
        }
        self.estimated_bytes = 0;

        TsBlock::try_new(RecordBatch::try_new(self.schema.clone(), arrays)?)
    }
}
