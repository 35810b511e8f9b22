use bytes::Bytes;
use callbatch_core::{
    Address, BlockTag, Call, CallQueue, Destination, Interface, ProtocolError, Selector, Slot,
};
use callbatch_transport::{CallContext, CallMsg, ContractCaller, Outcome, TransportError};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

/// Wraps one typed client so the calls made through it inside
/// [`Recorder::open`] are captured into a [`CallQueue`] instead of executed.
///
/// Every captured call must be announced with the two-step destination
/// protocol:
///
/// ```ignore
/// recorder.open(&queue, || {
///     recorder.set_destination(&guardian)?;
///     recorder.client()?.get_guardian(None).ok();
///     Ok(())
/// })?;
/// ```
///
/// Protocol violations inside the session never interrupt the body. They are
/// remembered (first one wins) and returned when the session closes, and the
/// offending call is left out of the queue.
pub struct Recorder<T> {
    address: Address,
    client: T,
    transport: Arc<RecordingTransport>,
    exclusive: Mutex<()>,
}

impl<T> Recorder<T> {
    /// Builds the typed client through `constructor`, handing it the
    /// recording transport in place of a live one.
    pub fn new<F, E>(address: Address, interface: Arc<dyn Interface>, constructor: F) -> Result<Self, E>
    where
        F: FnOnce(Address, Arc<dyn ContractCaller>) -> Result<T, E>,
    {
        let transport = Arc::new(RecordingTransport {
            interface,
            session: Mutex::new(Session::default()),
        });
        let caller: Arc<dyn ContractCaller> = transport.clone();
        let client = constructor(address, caller)?;

        Ok(Self {
            address,
            client,
            transport,
            exclusive: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn interface(&self) -> &Arc<dyn Interface> {
        &self.transport.interface
    }

    /// Whether the current thread holds an open session on this recorder.
    pub fn is_recording(&self) -> bool {
        self.transport.session().held_by_current_thread()
    }

    /// Runs `body` as a recording session appending into `queue`.
    ///
    /// A session opened from another thread blocks this call until it
    /// closes. Opening a second session from inside `body` fails with
    /// [`ProtocolError::AlreadyOpen`].
    pub fn open<F>(&self, queue: &CallQueue, body: F) -> Result<(), ProtocolError>
    where
        F: FnOnce() -> Result<(), ProtocolError>,
    {
        if self.is_recording() {
            return Err(ProtocolError::AlreadyOpen);
        }
        if queue.is_sealed() {
            return Err(ProtocolError::QueueSealed);
        }

        let _exclusive = self.exclusive.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = SessionGuard::begin(&self.transport, queue.clone());
        debug!(address = %self.address, interface = self.transport.interface.name(), "recording session opened");

        let result = body();
        let session = guard.close();
        debug!(
            address = %self.address,
            captured = session.captured,
            failed = session.error.is_some(),
            "recording session closed"
        );

        match session.error {
            Some(err) => Err(err),
            None => result,
        }
    }

    /// Registers `slot` as the destination of the next typed call.
    pub fn set_destination<V>(&self, slot: &Slot<V>) -> Result<(), ProtocolError>
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        let mut session = self.transport.session();
        if !session.held_by_current_thread() {
            return Err(ProtocolError::NotRecording);
        }
        if session.sequence != Sequence::AwaitingDestination {
            session.fail(ProtocolError::DuplicateDestination);
        }

        session.pending = Some(Destination::of(slot));
        session.sequence = Sequence::AwaitingCall;
        Ok(())
    }

    /// Returns the typed client for exactly one method call.
    pub fn client(&self) -> Result<&T, ProtocolError> {
        let mut session = self.transport.session();
        if !session.held_by_current_thread() {
            return Err(ProtocolError::NotRecording);
        }
        if session.sequence != Sequence::AwaitingCall {
            session.fail(ProtocolError::MissingDestination);
            session.pending = None;
        }

        session.sequence = Sequence::AwaitingDestination;
        Ok(&self.client)
    }
}

impl<T> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("address", &self.address)
            .field("interface", &self.transport.interface.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Sequence {
    #[default]
    AwaitingDestination,
    AwaitingCall,
}

#[derive(Default)]
struct Session {
    owner: Option<ThreadId>,
    sequence: Sequence,
    pending: Option<Destination>,
    error: Option<ProtocolError>,
    out: Option<CallQueue>,
    captured: usize,
}

impl Session {
    fn held_by_current_thread(&self) -> bool {
        self.owner == Some(thread::current().id())
    }

    fn fail(&mut self, err: ProtocolError) {
        warn!(error = %err, "recording protocol violation");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Resets the session when `open` returns or its body unwinds.
struct SessionGuard<'a> {
    transport: &'a RecordingTransport,
}

impl<'a> SessionGuard<'a> {
    fn begin(transport: &'a RecordingTransport, queue: CallQueue) -> Self {
        *transport.session() = Session {
            owner: Some(thread::current().id()),
            out: Some(queue),
            ..Session::default()
        };
        Self { transport }
    }

    fn close(self) -> Session {
        // Bound to a local so the lock is released before `drop` relocks it.
        let session = std::mem::take(&mut *self.transport.session());
        session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.transport.session() = Session::default();
    }
}

/// Transport handed to the typed client. Turns every call into a [`Call`]
/// on the session's queue and answers with an empty response.
struct RecordingTransport {
    interface: Arc<dyn Interface>,
    session: Mutex<Session>,
}

impl RecordingTransport {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContractCaller for RecordingTransport {
    fn call_contract(
        &self,
        _ctx: &CallContext,
        msg: CallMsg,
        _block: BlockTag,
    ) -> Result<Outcome, TransportError> {
        let mut session = self.session();
        if !session.held_by_current_thread() {
            return Err(ProtocolError::NotRecording.into());
        }

        let Some(destination) = session.pending.take() else {
            session.fail(ProtocolError::MissingDestination);
            return Ok(Outcome::Executed(Bytes::new()));
        };

        let selector = Selector::from_payload(&msg.data);
        let Some(method) = selector.and_then(|s| self.interface.method_by_selector(s)) else {
            let shown = selector.map_or_else(|| "<none>".to_string(), |s| s.to_string());
            session.fail(ProtocolError::UnknownSelector(shown, self.interface.name().to_string()));
            return Ok(Outcome::Executed(Bytes::new()));
        };

        trace!(address = %msg.to, method, "capturing call");
        let call = Call::captured(msg.to, Arc::clone(&self.interface), method, msg.data, destination);
        let pushed = session.out.as_ref().map(|queue| queue.push(call));
        match pushed {
            Some(Ok(_)) => session.captured += 1,
            Some(Err(err)) => session.fail(err),
            None => session.fail(ProtocolError::NotRecording),
        }

        Ok(Outcome::Executed(Bytes::new()))
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
