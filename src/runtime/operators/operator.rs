use std::fmt;
use std::future::Future;

use arrow::datatypes::SchemaRef;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;

use crate::common::error::{ExecutionError, Result};
use crate::common::ts_block::TsBlock;
use crate::runtime::operators::aggregate::merge_aggregate_operator::{MergeAggregateOperator, MergeAggregateSpec};
use crate::runtime::operators::aggregate::window_aggregate_operator::{WindowAggregateOperator, WindowAggregateSpec};
use crate::runtime::operators::source::exchange_source::ExchangeSourceOperator;
use crate::runtime::operators::source::values_source::ValuesOperator;
use crate::runtime::runtime_context::OperatorContext;

/// Outcome of one `next()` call.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// One or more complete rows.
    Ready(TsBlock),
    /// Nothing this time; retry once `is_blocked()` resolves.
    NotReady,
    /// No further output will ever be produced.
    EndOfStream,
}

impl PollResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollResult::Ready(_))
    }

    pub fn into_block(self) -> Option<TsBlock> {
        match self {
            PollResult::Ready(block) => Some(block),
            _ => None,
        }
    }
}

/// Signal that a later `next()` may make progress.
///
/// Cloning shares the same underlying future, so parents can hand a child's
/// readiness upward unchanged.
#[derive(Clone)]
pub struct Readiness {
    future: Option<Shared<BoxFuture<'static, ()>>>,
}

impl Readiness {
    pub fn ready() -> Self {
        Self { future: None }
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::from_shared(future.boxed().shared())
    }

    pub fn from_shared(future: Shared<BoxFuture<'static, ()>>) -> Self {
        Self { future: Some(future) }
    }

    /// True once the underlying future has completed. A future nobody has
    /// polled yet counts as pending.
    pub fn is_ready(&self) -> bool {
        match &self.future {
            None => true,
            Some(future) => future.peek().is_some(),
        }
    }

    pub async fn wait(self) {
        if let Some(future) = self.future {
            future.await;
        }
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness").field("ready", &self.is_ready()).finish()
    }
}

/// Pull contract shared by every operator and expected from every child.
///
/// `next()` must not be called a second time after returning `NotReady`
/// without an `is_blocked()` call in between.
pub trait OperatorTrait: Send + fmt::Debug {
    /// Output schema; column 0 is the time column.
    fn schema(&self) -> SchemaRef;

    fn is_blocked(&mut self) -> Readiness;

    fn has_next(&self) -> Result<bool>;

    fn next(&mut self) -> Result<PollResult>;

    /// Releases the operator and its children. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_finished(&self) -> Result<bool> {
        Ok(!self.has_next()?)
    }
}

pub type BoxedOperator = Box<dyn OperatorTrait>;

#[derive(Debug)]
pub enum Operator {
    Values(ValuesOperator),
    ExchangeSource(ExchangeSourceOperator),
    WindowAggregate(WindowAggregateOperator),
    MergeAggregate(MergeAggregateOperator),
}

impl OperatorTrait for Operator {
    fn schema(&self) -> SchemaRef {
        match self {
            Operator::Values(op) => op.schema(),
            Operator::ExchangeSource(op) => op.schema(),
            Operator::WindowAggregate(op) => op.schema(),
            Operator::MergeAggregate(op) => op.schema(),
        }
    }

    fn is_blocked(&mut self) -> Readiness {
        match self {
            Operator::Values(op) => op.is_blocked(),
            Operator::ExchangeSource(op) => op.is_blocked(),
            Operator::WindowAggregate(op) => op.is_blocked(),
            Operator::MergeAggregate(op) => op.is_blocked(),
        }
    }

    fn has_next(&self) -> Result<bool> {
        match self {
            Operator::Values(op) => op.has_next(),
            Operator::ExchangeSource(op) => op.has_next(),
            Operator::WindowAggregate(op) => op.has_next(),
            Operator::MergeAggregate(op) => op.has_next(),
        }
    }

    fn next(&mut self) -> Result<PollResult> {
        match self {
            Operator::Values(op) => op.next(),
            Operator::ExchangeSource(op) => op.next(),
            Operator::WindowAggregate(op) => op.next(),
            Operator::MergeAggregate(op) => op.next(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Operator::Values(op) => op.close(),
            Operator::ExchangeSource(op) => op.close(),
            Operator::WindowAggregate(op) => op.close(),
            Operator::MergeAggregate(op) => op.close(),
        }
    }
}

#[derive(Debug)]
pub enum OperatorConfig {
    ValuesConfig { schema: SchemaRef, blocks: Vec<TsBlock> },
    ExchangeSourceConfig { schema: SchemaRef, receiver: mpsc::Receiver<TsBlock> },
    WindowAggregateConfig(WindowAggregateSpec),
    MergeAggregateConfig(MergeAggregateSpec),
}

impl fmt::Display for OperatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorConfig::ValuesConfig { blocks, .. } => write!(f, "Values({} blocks)", blocks.len()),
            OperatorConfig::ExchangeSourceConfig { .. } => write!(f, "ExchangeSource"),
            OperatorConfig::WindowAggregateConfig(spec) => write!(f, "WindowAggregate({})", spec),
            OperatorConfig::MergeAggregateConfig(spec) => write!(f, "MergeAggregate({})", spec),
        }
    }
}

/// Builds one operator of a tree on top of already built `children`.
pub fn create_operator(
    config: OperatorConfig,
    children: Vec<BoxedOperator>,
    context: OperatorContext,
) -> Result<Operator> {
    let expect_children = |expected: &str, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(ExecutionError::InvalidConfig(format!(
                "{} expects {expected} children, got {}",
                context.operator_name(),
                children.len()
            )))
        }
    };

    match config {
        OperatorConfig::ValuesConfig { schema, blocks } => {
            expect_children("no", children.is_empty())?;
            Ok(Operator::Values(ValuesOperator::try_new(context, schema, blocks)?))
        }
        OperatorConfig::ExchangeSourceConfig { schema, receiver } => {
            expect_children("no", children.is_empty())?;
            Ok(Operator::ExchangeSource(ExchangeSourceOperator::new(context, schema, receiver)))
        }
        OperatorConfig::WindowAggregateConfig(spec) => {
            expect_children("exactly one", children.len() == 1)?;
            let mut children = children;
            let child = children.remove(0);
            Ok(Operator::WindowAggregate(WindowAggregateOperator::try_new(context, child, &spec)?))
        }
        OperatorConfig::MergeAggregateConfig(spec) => {
            expect_children("at least one", !children.is_empty())?;
            Ok(Operator::MergeAggregate(MergeAggregateOperator::try_new(context, children, &spec)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_clones_share_completion() {
        let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
        let readiness = Readiness::pending(async move {
            let _ = receiver.await;
        });
        let handed_up = readiness.clone();
        assert!(!handed_up.is_ready());

        sender.send(()).expect("send");
        readiness.wait().await;
        assert!(handed_up.is_ready());
        assert!(Readiness::ready().is_ready());
    }
}
