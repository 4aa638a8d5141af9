use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arrow::datatypes::SchemaRef;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, trace};

use crate::common::error::{ExecutionError, Result};
use crate::common::ts_block::TsBlock;
use crate::runtime::operators::operator::{OperatorTrait, PollResult, Readiness};
use crate::runtime::runtime_context::OperatorContext;

#[derive(Debug, Default)]
struct ExchangeState {
    /// Block received by a readiness future, handed out by the next pull.
    buffered: Option<TsBlock>,
    disconnected: bool,
}

fn lock_state(state: &Mutex<ExchangeState>) -> MutexGuard<'_, ExchangeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Source fed by an upstream producer through a tokio channel.
///
/// `next()` never waits: it returns `NotReady` when the channel is empty and
/// `is_blocked()` hands out a future that resolves once a block arrives or
/// every sender is dropped.
pub struct ExchangeSourceOperator {
    context: OperatorContext,
    schema: SchemaRef,
    receiver: Arc<AsyncMutex<Receiver<TsBlock>>>,
    state: Arc<Mutex<ExchangeState>>,
    pending: Option<Shared<BoxFuture<'static, ()>>>,
    awaiting_readiness: bool,
    closed: bool,
}

impl std::fmt::Debug for ExchangeSourceOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSourceOperator")
            .field("operator", &self.context.operator_name())
            .field("pending", &self.pending.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ExchangeSourceOperator {
    pub fn new(context: OperatorContext, schema: SchemaRef, receiver: Receiver<TsBlock>) -> Self {
        Self {
            context,
            schema,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            state: Arc::new(Mutex::new(ExchangeState::default())),
            pending: None,
            awaiting_readiness: false,
            closed: false,
        }
    }

    fn arm_receive(&mut self) -> Shared<BoxFuture<'static, ()>> {
        let receiver = self.receiver.clone();
        let state = self.state.clone();
        let future = async move {
            let received = receiver.lock().await.recv().await;
            let mut state = lock_state(&state);
            match received {
                Some(block) => state.buffered = Some(block),
                None => state.disconnected = true,
            }
        }
        .boxed()
        .shared();
        self.pending = Some(future.clone());
        future
    }

    fn pending_in_flight(&self) -> bool {
        self.pending.as_ref().is_some_and(|future| future.peek().is_none())
    }

    fn not_ready(&mut self) -> PollResult {
        self.awaiting_readiness = true;
        trace!(operator = self.context.operator_name(), "exchange empty");
        PollResult::NotReady
    }
}

impl OperatorTrait for ExchangeSourceOperator {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn is_blocked(&mut self) -> Readiness {
        self.awaiting_readiness = false;
        if self.closed {
            return Readiness::ready();
        }
        {
            let state = lock_state(&self.state);
            if state.buffered.is_some() || state.disconnected {
                return Readiness::ready();
            }
        }
        if let Some(future) = &self.pending {
            if future.peek().is_none() {
                return Readiness::from_shared(future.clone());
            }
        }
        Readiness::from_shared(self.arm_receive())
    }

    fn has_next(&self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let state = lock_state(&self.state);
        Ok(state.buffered.is_some() || !state.disconnected)
    }

    fn next(&mut self) -> Result<PollResult> {
        if self.closed {
            return Err(ExecutionError::protocol(self.context.operator_name(), "next() after close()"));
        }
        if self.awaiting_readiness {
            return Err(ExecutionError::protocol(
                self.context.operator_name(),
                "pulled again before readiness was checked",
            ));
        }

        {
            let mut state = lock_state(&self.state);
            if let Some(block) = state.buffered.take() {
                drop(state);
                self.pending = None;
                return Ok(PollResult::Ready(block));
            }
            if state.disconnected {
                return Ok(PollResult::EndOfStream);
            }
        }

        if self.pending_in_flight() {
            return Ok(self.not_ready());
        }
        let received = match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv(),
            Err(_) => Err(TryRecvError::Empty),
        };
        match received {
            Ok(block) => Ok(PollResult::Ready(block)),
            Err(TryRecvError::Empty) => Ok(self.not_ready()),
            Err(TryRecvError::Disconnected) => {
                lock_state(&self.state).disconnected = true;
                Ok(PollResult::EndOfStream)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending = None;
        if let Ok(mut receiver) = self.receiver.try_lock() {
            receiver.close();
        }
        info!(operator = self.context.operator_name(), "closing exchange source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Float64Array;
    use tokio::sync::mpsc;

    use super::*;

    fn block(times: Vec<i64>) -> TsBlock {
        let values: Vec<f64> = times.iter().map(|t| *t as f64).collect();
        TsBlock::from_columns(times, vec![("s1", Arc::new(Float64Array::from(values)))]).expect("block")
    }

    fn exchange() -> (ExchangeSourceOperator, mpsc::Sender<TsBlock>) {
        let (sender, receiver) = mpsc::channel(4);
        let op = ExchangeSourceOperator::new(OperatorContext::default(), block(vec![]).schema(), receiver);
        (op, sender)
    }

    #[tokio::test]
    async fn test_readiness_resolves_when_block_arrives() {
        let (mut op, sender) = exchange();
        assert!(matches!(op.next().expect("next"), PollResult::NotReady));

        let readiness = op.is_blocked();
        assert!(!readiness.is_ready());
        sender.send(block(vec![1, 2])).await.expect("send");
        readiness.wait().await;

        let pulled = op.next().expect("next").into_block().expect("block");
        assert_eq!(pulled.times(), &[1, 2]);
    }

    #[tokio::test]
    async fn test_second_pull_without_readiness_check_is_rejected() {
        let (mut op, _sender) = exchange();
        assert!(matches!(op.next().expect("next"), PollResult::NotReady));
        assert!(matches!(op.next(), Err(ExecutionError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_stream() {
        let (mut op, sender) = exchange();
        sender.send(block(vec![1])).await.expect("send");
        drop(sender);

        assert!(op.next().expect("next").is_ready());
        assert!(matches!(op.next().expect("next"), PollResult::EndOfStream));
        assert!(!op.has_next().expect("has_next"));

        op.close().expect("close");
        op.close().expect("close again");
        assert!(matches!(op.next(), Err(ExecutionError::ProtocolViolation { .. })));
    }
}
