use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::ts_block::TsBlock;
use crate::runtime::operators::operator::{BoxedOperator, PollResult};

/// Runs the root of an operator tree to completion on the tokio runtime.
///
/// The driver awaits the root's readiness before every pull, so a suspended
/// tree never sees two pulls without a readiness check.
#[derive(Debug)]
pub struct Driver {
    name: String,
    root: BoxedOperator,
    rows: usize,
    not_ready_polls: usize,
    closed: bool,
}

impl Driver {
    pub fn new(name: impl Into<String>, root: BoxedOperator) -> Self {
        Self {
            name: name.into(),
            root,
            rows: 0,
            not_ready_polls: 0,
            closed: false,
        }
    }

    pub fn rows(&self) -> usize { self.rows }
    pub fn not_ready_polls(&self) -> usize { self.not_ready_polls }

    /// Next output block, or `None` once the tree is exhausted.
    pub async fn next_block(&mut self) -> Result<Option<TsBlock>> {
        loop {
            if !self.root.has_next()? {
                return Ok(None);
            }
            let readiness = self.root.is_blocked();
            if !readiness.is_ready() {
                readiness.wait().await;
            }
            match self.root.next().with_context(|| format!("driver {} failed to pull", self.name))? {
                PollResult::Ready(block) => {
                    self.rows += block.num_rows();
                    debug!(driver = %self.name, rows = block.num_rows(), "output block");
                    return Ok(Some(block));
                }
                PollResult::NotReady => {
                    self.not_ready_polls += 1;
                    tokio::task::yield_now().await;
                }
                PollResult::EndOfStream => return Ok(None),
            }
        }
    }

    /// Collects every output block, then closes the tree. On failure the tree
    /// is still closed and the pull error is returned.
    pub async fn run(mut self) -> Result<Vec<TsBlock>> {
        let mut blocks = Vec::new();
        let outcome = loop {
            match self.next_block().await {
                Ok(Some(block)) => blocks.push(block),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let closed = self.close();
        if let Err(e) = outcome {
            if let Err(close_error) = closed {
                warn!(driver = %self.name, error = %close_error, "close after failure also failed");
            }
            return Err(e);
        }
        closed?;

        info!(
            driver = %self.name,
            blocks = blocks.len(),
            rows = self.rows,
            not_ready_polls = self.not_ready_polls,
            "driver finished"
        );
        Ok(blocks)
    }

    pub fn spawn(self) -> JoinHandle<Result<Vec<TsBlock>>> {
        tokio::spawn(self.run())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.root
            .close()
            .with_context(|| format!("driver {} failed to close its operator tree", self.name))
    }
}
