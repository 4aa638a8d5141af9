pub mod common;
pub mod runtime;

pub use common::{ExecutionConfig, ExecutionError, TimeRange, Timestamp, TsBlock};
pub use runtime::driver::Driver;
pub use runtime::functions::aggregate::{AggregationKind, AggregationSpec, AggregationStep, Aggregator};
pub use runtime::operators::aggregate::{
    MergeAggregateOperator, MergeAggregateSpec, WindowAggregateOperator, WindowAggregateSpec,
};
pub use runtime::operators::operator::{
    create_operator, BoxedOperator, Operator, OperatorConfig, OperatorTrait, PollResult, Readiness,
};
pub use runtime::operators::source::{ExchangeSourceOperator, ValuesOperator};
pub use runtime::runtime_context::OperatorContext;
pub use runtime::window::{GroupByTimeParameter, TimeDuration};
