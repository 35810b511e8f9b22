use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

use crate::codec::Interface;
use crate::error::{DecodeError, EncodeError, ProtocolError};
use crate::ids::{Address, BatchId};
use crate::slot::Destination;

type EncodeFn = dyn Fn() -> Result<Bytes, EncodeError> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Result<(), DecodeError> + Send + Sync;

/// A deferred, replayable remote invocation.
///
/// `encode` and `decode` may be invoked any number of times. Encoding never
/// has side effects; decoding writes into the call's destination.
#[derive(Clone)]
pub struct Call {
    target: Address,
    method: String,
    destination: Destination,
    encode: Arc<EncodeFn>,
    decode: Arc<DecodeFn>,
}

impl Call {
    pub fn new<E, D>(
        target: Address,
        method: impl Into<String>,
        destination: Destination,
        encode: E,
        decode: D,
    ) -> Self
    where
        E: Fn() -> Result<Bytes, EncodeError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<(), DecodeError> + Send + Sync + 'static,
    {
        Self {
            target,
            method: method.into(),
            destination,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Builds a call around a payload a typed client already encoded.
    pub fn captured(
        target: Address,
        interface: Arc<dyn Interface>,
        method: impl Into<String>,
        payload: Bytes,
        destination: Destination,
    ) -> Self {
        let method = method.into();
        let decode = unpack_into(Arc::clone(&interface), method.clone(), destination.clone());
        Self::new(target, method, destination, move || Ok(payload.clone()), decode)
    }

    /// Builds a call whose payload is packed from `args` only when encoded.
    pub fn prepared(
        target: Address,
        interface: Arc<dyn Interface>,
        method: impl Into<String>,
        args: Vec<Value>,
        destination: Destination,
    ) -> Self {
        let method = method.into();
        let decode = unpack_into(Arc::clone(&interface), method.clone(), destination.clone());
        let packed_method = method.clone();
        Self::new(
            target,
            method,
            destination,
            move || interface.pack(&packed_method, &args),
            decode,
        )
    }

    pub fn target(&self) -> &Address {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        (self.encode)()
    }

    pub fn decode(&self, raw: &[u8]) -> Result<(), DecodeError> {
        (self.decode)(raw)
    }
}

fn unpack_into(
    interface: Arc<dyn Interface>,
    method: String,
    destination: Destination,
) -> impl Fn(&[u8]) -> Result<(), DecodeError> + Send + Sync + 'static {
    move |raw| {
        let value = interface.unpack(&method, raw)?;
        destination.store(&method, value)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Ordered, shared sink for captured calls.
///
/// Cloning yields another handle to the same queue, so several recorders can
/// append into one batch. Appends are rejected once the queue was handed off
/// with [`CallQueue::take_batch`].
#[derive(Clone, Default)]
pub struct CallQueue {
    inner: Arc<Mutex<QueueInner>>,
}

#[derive(Default)]
struct QueueInner {
    calls: Vec<Call>,
    sealed: bool,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call, returning its position in the queue.
    pub fn push(&self, call: Call) -> Result<usize, ProtocolError> {
        let mut inner = self.lock();
        if inner.sealed {
            return Err(ProtocolError::QueueSealed);
        }
        trace!(address = %call.target, method = %call.method, index = inner.calls.len(), "queued call");
        inner.calls.push(call);
        Ok(inner.calls.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().calls.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Copies the queued descriptors without consuming the queue.
    pub fn snapshot(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Hands every queued call off for execution and seals the queue.
    pub fn take_batch(&self) -> Result<Batch, ProtocolError> {
        let mut inner = self.lock();
        if inner.sealed {
            return Err(ProtocolError::QueueSealed);
        }
        inner.sealed = true;
        Ok(Batch::new(std::mem::take(&mut inner.calls)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CallQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CallQueue")
            .field("calls", &inner.calls)
            .field("sealed", &inner.sealed)
            .finish()
    }
}

/// Calls handed off from a [`CallQueue`], in capture order.
#[derive(Debug, Clone)]
pub struct Batch {
    id: BatchId,
    calls: Vec<Call>,
}

impl Batch {
    pub fn new(calls: Vec<Call>) -> Self {
        Self {
            id: BatchId::new(),
            calls,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Call> {
        self.calls.iter()
    }

    /// Encodes every call as `(target, payload)` in batch order.
    pub fn encode_all(&self) -> Result<Vec<(Address, Bytes)>, EncodeError> {
        self.calls
            .iter()
            .map(|call| Ok((call.target, call.encode()?)))
            .collect()
    }

    pub fn into_calls(self) -> Vec<Call> {
        self.calls
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Call;
    type IntoIter = std::slice::Iter<'a, Call>;

    fn into_iter(self) -> Self::IntoIter {
        self.calls.iter()
    }
}
