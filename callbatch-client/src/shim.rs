use bytes::Bytes;
use callbatch_core::{Address, Batch, BlockTag, Call, CallQueue, Interface, ProtocolError, Slot};
use callbatch_transport::{CallContext, CallMsg, CallOpts, ContractCaller, Outcome, TransportError};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Transport that defers every call it receives.
///
/// Unlike [`Recorder`](crate::Recorder), no session is involved: each call
/// carries its own capture parameters in its [`CallContext`] (see
/// [`DeferringCaller::opts`]). Calls that arrive without all of them fail
/// with a configuration error.
///
/// Successful captures answer [`Outcome::Deferred`], which typed clients
/// surface as [`Reply::Deferred`](callbatch_transport::Reply::Deferred).
/// Callers must treat that as "queued", not as a result: nothing has been
/// executed until the batch is handed to an executor.
#[derive(Debug, Default)]
pub struct DeferringCaller {
    queue: CallQueue,
    pinned: Mutex<Option<BlockTag>>,
}

impl DeferringCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends into an existing queue, e.g. one shared with a recorder.
    pub fn with_queue(queue: CallQueue) -> Self {
        Self {
            queue,
            pinned: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &CallQueue {
        &self.queue
    }

    /// Block every captured call so far was declared against.
    pub fn pinned_block(&self) -> Option<BlockTag> {
        *self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take_batch(&self) -> Result<Batch, ProtocolError> {
        self.queue.take_batch()
    }

    /// Call options capturing into `slot` through `method` of `interface`.
    pub fn opts<V>(interface: &Arc<dyn Interface>, method: &str, slot: &Slot<V>, block: BlockTag) -> CallOpts
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        CallOpts::at(block).with_context(
            CallContext::new()
                .with_interface(Arc::clone(interface))
                .with_method(method)
                .with_destination(slot),
        )
    }

    fn pin(&self, block: BlockTag) -> Result<(), TransportError> {
        let mut pinned = self.pinned.lock().unwrap_or_else(PoisonError::into_inner);
        match *pinned {
            None => {
                debug!(%block, "pinned batch block");
                *pinned = Some(block);
                Ok(())
            }
            Some(existing) if existing == block => Ok(()),
            Some(existing) => Err(TransportError::BlockMismatch {
                pinned: existing,
                found: block,
            }),
        }
    }
}

impl ContractCaller for DeferringCaller {
    fn call_contract(
        &self,
        ctx: &CallContext,
        msg: CallMsg,
        block: BlockTag,
    ) -> Result<Outcome, TransportError> {
        let (interface, method, destination) = ctx.capture().require()?;
        self.pin(block)?;

        trace!(address = %msg.to, method, %block, "deferring call");
        let call = Call::captured(
            msg.to,
            Arc::clone(interface),
            method,
            msg.data,
            destination.clone(),
        );
        self.queue.push(call)?;
        Ok(Outcome::Deferred)
    }

    fn code_at(
        &self,
        _ctx: &CallContext,
        _address: &Address,
        _block: BlockTag,
    ) -> Result<Bytes, TransportError> {
        Err(TransportError::Unsupported("code_at"))
    }
}
