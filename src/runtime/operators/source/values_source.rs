use std::collections::VecDeque;

use arrow::datatypes::SchemaRef;
use tracing::info;

use crate::common::error::{ExecutionError, Result};
use crate::common::ts_block::TsBlock;
use crate::runtime::operators::operator::{OperatorTrait, PollResult, Readiness};
use crate::runtime::runtime_context::OperatorContext;

/// Replays a fixed list of blocks, one per `next()`. Never blocks.
#[derive(Debug)]
pub struct ValuesOperator {
    context: OperatorContext,
    schema: SchemaRef,
    blocks: VecDeque<TsBlock>,
    closed: bool,
}

impl ValuesOperator {
    pub fn try_new(context: OperatorContext, schema: SchemaRef, blocks: Vec<TsBlock>) -> Result<Self> {
        for block in &blocks {
            let block_schema = block.schema();
            let matches = block_schema.fields().len() == schema.fields().len()
                && block_schema
                    .fields()
                    .iter()
                    .zip(schema.fields().iter())
                    .all(|(a, b)| a.data_type() == b.data_type());
            if !matches {
                return Err(ExecutionError::MalformedBlock(format!(
                    "{} got a block whose columns do not match its schema",
                    context.operator_name()
                )));
            }
        }
        Ok(Self {
            context,
            schema,
            blocks: blocks.into(),
            closed: false,
        })
    }

    /// Takes the schema from the first block.
    pub fn from_blocks(context: OperatorContext, blocks: Vec<TsBlock>) -> Result<Self> {
        let schema = blocks
            .first()
            .map(TsBlock::schema)
            .ok_or_else(|| ExecutionError::InvalidConfig("values operator needs at least one block".to_string()))?;
        Self::try_new(context, schema, blocks)
    }
}

impl OperatorTrait for ValuesOperator {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn is_blocked(&mut self) -> Readiness {
        Readiness::ready()
    }

    fn has_next(&self) -> Result<bool> {
        Ok(!self.closed && !self.blocks.is_empty())
    }

    fn next(&mut self) -> Result<PollResult> {
        if self.closed {
            return Err(ExecutionError::protocol(self.context.operator_name(), "next() after close()"));
        }
        Ok(match self.blocks.pop_front() {
            Some(block) => PollResult::Ready(block),
            None => PollResult::EndOfStream,
        })
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.blocks.clear();
            info!(operator = self.context.operator_name(), "closing values source");
        }
        Ok(())
    }
}
