use std::fmt;

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::{TimeRange, Timestamp};
use crate::runtime::window::group_by_time::{add_months, GroupByTimeParameter, TimeDuration};

/// Cursor over the windows of a query, in scan order.
///
/// Windows are disjoint and strictly ordered; the cursor only moves forward,
/// so restarting means building a new iterator.
pub trait TimeRangeIterator: Send + fmt::Debug {
    fn has_next_time_range(&self) -> bool;

    fn next_time_range(&mut self) -> Option<TimeRange>;

    /// Timestamp written to the output row of the range last returned by
    /// `next_time_range`.
    fn current_output_time(&self) -> Timestamp;

    fn is_ascending(&self) -> bool;

    fn total_time_range_count(&self) -> usize;
}

pub fn init_time_range_iterator(
    group_by_time: Option<&GroupByTimeParameter>,
    ascending: bool,
    output_partial_window: bool,
) -> Result<Box<dyn TimeRangeIterator>> {
    match group_by_time {
        None => Ok(Box::new(SingleTimeWindowIterator::new(ascending))),
        Some(param) => Ok(Box::new(AggrWindowIterator::try_new(
            param,
            ascending,
            output_partial_window,
        )?)),
    }
}

/// Aggregation without `GROUP BY TIME`: one window spanning all time.
#[derive(Debug)]
pub struct SingleTimeWindowIterator {
    ascending: bool,
    consumed: bool,
}

impl SingleTimeWindowIterator {
    pub fn new(ascending: bool) -> Self {
        Self { ascending, consumed: false }
    }
}

impl TimeRangeIterator for SingleTimeWindowIterator {
    fn has_next_time_range(&self) -> bool {
        !self.consumed
    }

    fn next_time_range(&mut self) -> Option<TimeRange> {
        if self.consumed {
            return None;
        }
        self.consumed = true;
        Some(TimeRange::new(Timestamp::MIN, Timestamp::MAX))
    }

    fn current_output_time(&self) -> Timestamp {
        0
    }

    fn is_ascending(&self) -> bool {
        self.ascending
    }

    fn total_time_range_count(&self) -> usize {
        1
    }
}

#[derive(Debug)]
enum WindowBounds {
    Fixed { interval: i64, step: i64 },
    /// Month-based windows are materialised up front as `[start, end)` pairs.
    Calendar(Vec<(Timestamp, Timestamp)>),
}

/// Windows of a `GROUP BY TIME` clause.
#[derive(Debug)]
pub struct AggrWindowIterator {
    start_time: Timestamp,
    end_time: Timestamp,
    bounds: WindowBounds,
    left_closed_right_open: bool,
    ascending: bool,
    count: usize,
    emitted: usize,
    current_output_time: Timestamp,
}

impl AggrWindowIterator {
    /// With `output_partial_window` unset, a trailing window cut short by
    /// `end_time` is dropped.
    pub fn try_new(param: &GroupByTimeParameter, ascending: bool, output_partial_window: bool) -> Result<Self> {
        param.validate()?;
        let (bounds, count) = match (param.interval, param.sliding_step()) {
            (TimeDuration::Millis(interval), TimeDuration::Millis(step)) => {
                let span = param.end_time as i128 - param.start_time as i128;
                let mut count = ((span + step as i128 - 1) / step as i128) as usize;
                let last_start = param.start_time as i128 + (count as i128 - 1) * step as i128;
                if last_start + interval as i128 > param.end_time as i128 && !output_partial_window {
                    count -= 1;
                }
                (WindowBounds::Fixed { interval, step }, count)
            }
            (TimeDuration::Months(interval), TimeDuration::Months(step)) => {
                let windows = calendar_windows(param, interval, step, output_partial_window)?;
                let count = windows.len();
                (WindowBounds::Calendar(windows), count)
            }
            _ => {
                return Err(ExecutionError::Unsupported(
                    "interval and sliding step must use the same unit".to_string(),
                ))
            }
        };

        Ok(Self {
            start_time: param.start_time,
            end_time: param.end_time,
            bounds,
            left_closed_right_open: param.left_closed_right_open,
            ascending,
            count,
            emitted: 0,
            current_output_time: param.start_time,
        })
    }

    /// `[start, end)` of the k-th window in ascending order.
    fn window_bounds(&self, index: usize) -> (Timestamp, Timestamp) {
        match &self.bounds {
            WindowBounds::Fixed { interval, step } => {
                let start = self.start_time + index as i64 * step;
                let end = start.saturating_add(*interval).min(self.end_time);
                (start, end)
            }
            WindowBounds::Calendar(windows) => windows[index],
        }
    }
}

fn calendar_windows(
    param: &GroupByTimeParameter,
    interval: u32,
    step: u32,
    output_partial_window: bool,
) -> Result<Vec<(Timestamp, Timestamp)>> {
    let mut windows = Vec::new();
    let mut offset: u32 = 0;
    loop {
        let start = add_months(param.start_time, offset)?;
        if start >= param.end_time {
            break;
        }
        let end = add_months(param.start_time, offset + interval)?;
        if end > param.end_time {
            if output_partial_window {
                windows.push((start, param.end_time));
            }
            break;
        }
        windows.push((start, end));
        offset += step;
    }
    Ok(windows)
}

impl TimeRangeIterator for AggrWindowIterator {
    fn has_next_time_range(&self) -> bool {
        self.emitted < self.count
    }

    fn next_time_range(&mut self) -> Option<TimeRange> {
        if !self.has_next_time_range() {
            return None;
        }
        let index = if self.ascending {
            self.emitted
        } else {
            self.count - 1 - self.emitted
        };
        self.emitted += 1;

        let (start, end) = self.window_bounds(index);
        if self.left_closed_right_open {
            self.current_output_time = start;
            Some(TimeRange::new(start, end - 1))
        } else {
            self.current_output_time = end;
            Some(TimeRange::new(start + 1, end))
        }
    }

    fn current_output_time(&self) -> Timestamp {
        self.current_output_time
    }

    fn is_ascending(&self) -> bool {
        self.ascending
    }

    fn total_time_range_count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(iter: &mut dyn TimeRangeIterator) -> Vec<(i64, i64)> {
        let mut ranges = Vec::new();
        while let Some(range) = iter.next_time_range() {
            ranges.push((range.min, range.max));
        }
        ranges
    }

    #[test]
    fn test_tumbling_windows_ascending_and_descending() {
        let param = GroupByTimeParameter::new(0, 10, TimeDuration::Millis(5));
        let mut asc = AggrWindowIterator::try_new(&param, true, false).expect("iterator");
        assert_eq!(collect(&mut asc), vec![(0, 4), (5, 9)]);
        assert!(!asc.has_next_time_range());

        let mut desc = AggrWindowIterator::try_new(&param, false, false).expect("iterator");
        assert_eq!(collect(&mut desc), vec![(5, 9), (0, 4)]);
    }

    #[test]
    fn test_partial_trailing_window() {
        let param = GroupByTimeParameter::new(0, 10, TimeDuration::Millis(3));
        let mut with_partial = AggrWindowIterator::try_new(&param, true, true).expect("iterator");
        assert_eq!(collect(&mut with_partial), vec![(0, 2), (3, 5), (6, 8), (9, 9)]);

        let mut without_partial = AggrWindowIterator::try_new(&param, true, false).expect("iterator");
        assert_eq!(without_partial.total_time_range_count(), 3);
        assert_eq!(collect(&mut without_partial), vec![(0, 2), (3, 5), (6, 8)]);

        // descending scan meets the partial window first
        let mut desc = AggrWindowIterator::try_new(&param, false, true).expect("iterator");
        assert_eq!(desc.next_time_range(), Some(TimeRange::new(9, 9)));
    }

    #[test]
    fn test_sliding_step_leaves_gaps() {
        let param = GroupByTimeParameter::new(0, 20, TimeDuration::Millis(2))
            .with_sliding_step(TimeDuration::Millis(5));
        let mut iter = AggrWindowIterator::try_new(&param, true, false).expect("iterator");
        assert_eq!(collect(&mut iter), vec![(0, 1), (5, 6), (10, 11), (15, 16)]);
    }

    #[test]
    fn test_left_open_right_closed_output_time() {
        let param = GroupByTimeParameter::new(0, 10, TimeDuration::Millis(5))
            .with_left_closed_right_open(false);
        let mut iter = AggrWindowIterator::try_new(&param, true, false).expect("iterator");
        assert_eq!(iter.next_time_range(), Some(TimeRange::new(1, 5)));
        assert_eq!(iter.current_output_time(), 5);
        assert_eq!(iter.next_time_range(), Some(TimeRange::new(6, 10)));
        assert_eq!(iter.current_output_time(), 10);
    }

    #[test]
    fn test_calendar_month_windows() {
        // 2024-01-01 .. 2024-04-01
        let jan_1 = 1_704_067_200_000;
        let feb_1 = 1_706_745_600_000;
        let mar_1 = 1_709_251_200_000;
        let apr_1 = 1_711_929_600_000;
        let param = GroupByTimeParameter::new(jan_1, apr_1, TimeDuration::Months(1));
        let mut iter = AggrWindowIterator::try_new(&param, true, false).expect("iterator");
        assert_eq!(
            collect(&mut iter),
            vec![(jan_1, feb_1 - 1), (feb_1, mar_1 - 1), (mar_1, apr_1 - 1)]
        );
    }

    #[test]
    fn test_single_window_covers_everything() {
        let mut iter = init_time_range_iterator(None, true, false).expect("iterator");
        assert_eq!(iter.next_time_range(), Some(TimeRange::new(i64::MIN, i64::MAX)));
        assert!(!iter.has_next_time_range());
        assert_eq!(iter.next_time_range(), None);
    }
}
