pub mod accumulator;
pub mod aggregator;

pub use accumulator::Accumulator;
pub use aggregator::{create_accumulator, AggregationKind, AggregationSpec, AggregationStep, Aggregator};
