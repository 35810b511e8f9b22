use bytes::Bytes;
use callbatch_core::{
    Address, BlockTag, ConfigError, DecodeError, Destination, EncodeError, ErrorCode, Interface,
    ProtocolError, Slot,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("all calls in a batch must target the same block, pinned {pinned} but got {found}")]
    BlockMismatch { pinned: BlockTag, found: BlockTag },
    #[error("{0} unimplemented")]
    Unsupported(&'static str),
    #[error("Remote call failed: {0}")]
    Remote(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Config(_) => ErrorCode::Config,
            TransportError::Protocol(_) | TransportError::BlockMismatch { .. } => {
                ErrorCode::Protocol
            }
            TransportError::Encode(_) => ErrorCode::Encode,
            TransportError::Decode(_) => ErrorCode::Decode,
            _ => ErrorCode::Internal,
        }
    }
}

/// Request a typed client hands to its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMsg {
    pub to: Address,
    pub data: Bytes,
}

impl CallMsg {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
        }
    }
}

/// What a transport did with a call.
///
/// `Deferred` is not a failure: the call was captured for later batched
/// execution and produced no bytes yet. Typed clients must surface it to
/// their caller instead of trying to decode a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Executed(Bytes),
    Deferred,
}

impl Outcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred)
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Outcome::Executed(bytes) => Some(bytes),
            Outcome::Deferred => None,
        }
    }
}

/// Capture parameters a caller attaches to one call so a deferring
/// transport knows how to decode the eventual response and where to put it.
#[derive(Debug, Clone, Default)]
pub struct CaptureSpec {
    pub interface: Option<Arc<dyn Interface>>,
    pub method: Option<String>,
    pub destination: Option<Destination>,
}

impl CaptureSpec {
    /// Returns all three values or the first one missing.
    pub fn require(&self) -> Result<(&Arc<dyn Interface>, &str, &Destination), ConfigError> {
        let interface = self.interface.as_ref().ok_or(ConfigError::MissingInterface)?;
        let method = self.method.as_deref().ok_or(ConfigError::MissingMethod)?;
        let destination = self
            .destination
            .as_ref()
            .ok_or(ConfigError::MissingDestination)?;
        Ok((interface, method, destination))
    }
}

/// Per-call context threaded from the typed client's call options down to
/// its transport.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    capture: CaptureSpec,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, interface: Arc<dyn Interface>) -> Self {
        self.capture.interface = Some(interface);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.capture.method = Some(method.into());
        self
    }

    pub fn with_destination<V>(mut self, slot: &Slot<V>) -> Self
    where
        V: serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        self.capture.destination = Some(Destination::of(slot));
        self
    }

    pub fn capture(&self) -> &CaptureSpec {
        &self.capture
    }
}

/// Options accepted by every typed client method.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    pub block: BlockTag,
    pub context: CallContext,
}

impl CallOpts {
    pub fn at(block: BlockTag) -> Self {
        Self {
            block,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// Transport capability typed clients are generated against.
pub trait ContractCaller: Send + Sync {
    /// Executes a read-only call and returns the raw response.
    fn call_contract(
        &self,
        ctx: &CallContext,
        msg: CallMsg,
        block: BlockTag,
    ) -> Result<Outcome, TransportError>;

    /// Returns the code deployed at `address`.
    fn code_at(
        &self,
        ctx: &CallContext,
        address: &Address,
        block: BlockTag,
    ) -> Result<Bytes, TransportError>;
}

impl<T: ContractCaller + ?Sized> ContractCaller for Arc<T> {
    fn call_contract(
        &self,
        ctx: &CallContext,
        msg: CallMsg,
        block: BlockTag,
    ) -> Result<Outcome, TransportError> {
        (**self).call_contract(ctx, msg, block)
    }

    fn code_at(
        &self,
        ctx: &CallContext,
        address: &Address,
        block: BlockTag,
    ) -> Result<Bytes, TransportError> {
        (**self).code_at(ctx, address, block)
    }
}

/// Packs the arguments of a typed method. Used by hand-written and generated
/// typed clients alike.
pub fn pack_call(
    interface: &dyn Interface,
    to: Address,
    method: &str,
    args: &[Value],
) -> Result<CallMsg, TransportError> {
    Ok(CallMsg::new(to, interface.pack(method, args)?))
}
