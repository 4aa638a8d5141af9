pub mod merge_aggregate_operator;
pub mod result_builder;
pub mod utils;
pub mod window_aggregate_operator;


pub use merge_aggregate_operator::{MergeAggregateOperator, MergeAggregateSpec};
pub use result_builder::ResultBlockBuilder;
pub use window_aggregate_operator::{WindowAggregateOperator, WindowAggregateSpec};
