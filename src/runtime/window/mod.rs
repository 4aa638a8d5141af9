pub mod group_by_time;
pub mod time_range_iterator;

pub use group_by_time::{GroupByTimeParameter, TimeDuration};
pub use time_range_iterator::{
    init_time_range_iterator, AggrWindowIterator, SingleTimeWindowIterator, TimeRangeIterator,
};
