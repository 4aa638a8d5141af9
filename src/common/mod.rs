pub mod config;
pub mod error;
pub mod time_range;
pub mod ts_block;

pub use config::ExecutionConfig;
pub use error::{ExecutionError, Result};
pub use time_range::{TimeRange, Timestamp};
pub use ts_block::TsBlock;
