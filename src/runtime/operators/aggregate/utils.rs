use std::sync::Arc;

use arrow::datatypes::{DataType, Field, SchemaBuilder, SchemaRef};

use crate::common::error::Result;
use crate::common::time_range::{TimeRange, Timestamp};
use crate::common::ts_block::TIME_COLUMN;
use crate::runtime::functions::aggregate::Aggregator;
use crate::runtime::operators::aggregate::result_builder::ResultBlockBuilder;

/// Time column followed by every aggregator's output columns, in order.
pub fn create_output_schema(aggregators: &[Aggregator]) -> SchemaRef {
    let mut builder = SchemaBuilder::new();
    builder.push(Field::new(TIME_COLUMN, DataType::Int64, false));
    for aggregator in aggregators {
        for field in aggregator.output_fields() {
            builder.push(field);
        }
    }
    Arc::new(builder.finish())
}

pub fn update_time_range(aggregators: &mut [Aggregator], time_range: TimeRange) {
    for aggregator in aggregators.iter_mut() {
        aggregator.update_time_range(time_range);
    }
}

pub fn is_all_aggregators_final(aggregators: &[Aggregator]) -> bool {
    aggregators.iter().all(Aggregator::has_final_result)
}

/// Appends the closed window's row.
pub fn append_aggregation_result(
    builder: &mut ResultBlockBuilder,
    output_time: Timestamp,
    aggregators: &[Aggregator],
) -> Result<()> {
    let mut values = Vec::new();
    for aggregator in aggregators {
        values.extend(aggregator.output()?);
    }
    builder.append_row(output_time, values)
}
