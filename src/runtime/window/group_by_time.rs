use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{ExecutionError, Result};
use crate::common::time_range::Timestamp;

/// Length of a window or of the step between window starts.
///
/// Written in plans as a one-key map, e.g. `interval: {millis: 10}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDuration {
    Millis(i64),
    /// Calendar months, so window bounds follow month lengths.
    Months(u32),
}

impl TimeDuration {
    fn is_positive(&self) -> bool {
        match self {
            TimeDuration::Millis(ms) => *ms > 0,
            TimeDuration::Months(months) => *months > 0,
        }
    }
}

fn default_left_closed_right_open() -> bool {
    true
}

/// Windowing part of a `GROUP BY TIME` clause.
///
/// Windows start at `start_time + k * sliding_step` and cover `interval`,
/// never reaching past the exclusive `end_time`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByTimeParameter {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub interval: TimeDuration,
    /// Defaults to `interval` (tumbling windows).
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub sliding_step: Option<TimeDuration>,
    #[serde(default = "default_left_closed_right_open")]
    pub left_closed_right_open: bool,
}

impl GroupByTimeParameter {
    pub fn new(start_time: Timestamp, end_time: Timestamp, interval: TimeDuration) -> Self {
        Self {
            start_time,
            end_time,
            interval,
            sliding_step: None,
            left_closed_right_open: true,
        }
    }

    pub fn with_sliding_step(mut self, sliding_step: TimeDuration) -> Self {
        self.sliding_step = Some(sliding_step);
        self
    }

    pub fn with_left_closed_right_open(mut self, left_closed_right_open: bool) -> Self {
        self.left_closed_right_open = left_closed_right_open;
        self
    }

    pub fn sliding_step(&self) -> TimeDuration {
        self.sliding_step.unwrap_or(self.interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_time >= self.end_time {
            return Err(ExecutionError::InvalidConfig(format!(
                "group by time range [{}, {}) is empty",
                self.start_time, self.end_time
            )));
        }
        let step = self.sliding_step();
        if !self.interval.is_positive() || !step.is_positive() {
            return Err(ExecutionError::InvalidConfig(
                "interval and sliding step must be positive".to_string(),
            ));
        }
        let overlapping = match (self.interval, step) {
            (TimeDuration::Millis(interval), TimeDuration::Millis(step)) => step < interval,
            (TimeDuration::Months(interval), TimeDuration::Months(step)) => step < interval,
            _ => {
                return Err(ExecutionError::Unsupported(
                    "interval and sliding step must use the same unit".to_string(),
                ))
            }
        };
        if overlapping {
            return Err(ExecutionError::Unsupported(
                "sliding step shorter than interval produces overlapping windows".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn add_months(ts: Timestamp, months: u32) -> Result<Timestamp> {
    let out_of_range = || ExecutionError::InvalidConfig(format!("timestamp {ts} + {months} months is out of range"));
    let date_time = DateTime::<Utc>::from_timestamp_millis(ts).ok_or_else(out_of_range)?;
    let shifted = date_time
        .checked_add_months(Months::new(months))
        .ok_or_else(out_of_range)?;
    Ok(shifted.timestamp_millis())
}
