use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use thiserror::Error;

/// Errors raised while executing an operator tree.
///
/// "No data yet" and "input exhausted" are not errors, they travel through
/// [`PollResult`](crate::runtime::operators::operator::PollResult).
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The pull contract was broken by the caller: a second pull without an
    /// intervening readiness signal, or a pull after close.
    #[error("protocol violation in {operator}: {message}")]
    ProtocolViolation { operator: String, message: String },

    #[error("malformed block: {0}")]
    MalformedBlock(String),

    /// Timestamps inside a block do not follow the declared scan direction.
    #[error("block timestamps are not {expected} (rows {row} and {next_row})")]
    ScanOrder {
        expected: &'static str,
        row: usize,
        next_row: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
}

impl ExecutionError {
    pub fn protocol(operator: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::ProtocolViolation {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
