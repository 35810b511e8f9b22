//! Runtime support for typed clients.
//!
//! Generated (or hand-written) typed clients hold a [`BoundContract`] and
//! forward each typed method to [`BoundContract::call`], so they behave the
//! same whether the transport underneath executes, records or defers.

use bytes::Bytes;
use callbatch_core::{Address, DecodeError, Interface};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::transport::{pack_call, CallOpts, ContractCaller, Outcome, TransportError};

/// Result of a typed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<V> {
    /// The call was executed and its response decoded.
    Ready(V),
    /// The call was captured for batched execution.
    Deferred,
    /// The transport answered without response bytes.
    Empty,
}

impl<V> Reply<V> {
    pub fn ready(self) -> Option<V> {
        match self {
            Reply::Ready(v) => Some(v),
            Reply::Deferred | Reply::Empty => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Reply::Deferred)
    }
}

/// An interface bound to an address and a transport.
#[derive(Clone)]
pub struct BoundContract {
    address: Address,
    interface: Arc<dyn Interface>,
    caller: Arc<dyn ContractCaller>,
}

impl BoundContract {
    pub fn new(
        address: Address,
        interface: Arc<dyn Interface>,
        caller: Arc<dyn ContractCaller>,
    ) -> Self {
        Self {
            address,
            interface,
            caller,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn interface(&self) -> &Arc<dyn Interface> {
        &self.interface
    }

    /// Invokes `method` with `args` and decodes the response into `V`.
    pub fn call<V: DeserializeOwned>(
        &self,
        opts: Option<&CallOpts>,
        method: &str,
        args: &[Value],
    ) -> Result<Reply<V>, TransportError> {
        let default_opts = CallOpts::default();
        let opts = opts.unwrap_or(&default_opts);
        let msg = pack_call(self.interface.as_ref(), self.address, method, args)?;

        let raw = match self.caller.call_contract(&opts.context, msg, opts.block)? {
            Outcome::Deferred => return Ok(Reply::Deferred),
            Outcome::Executed(raw) if raw.is_empty() => return Ok(Reply::Empty),
            Outcome::Executed(raw) => raw,
        };
        trace!(address = %self.address, method, bytes = raw.len(), "decoding response");

        let value = self.interface.unpack(method, &raw)?;
        let decoded = serde_json::from_value(value).map_err(|e| {
            TransportError::Decode(DecodeError::Type {
                method: method.to_string(),
                expected: type_name::<V>(),
                reason: e.to_string(),
            })
        })?;
        Ok(Reply::Ready(decoded))
    }

    /// Fetches the code deployed at the bound address.
    pub fn code(&self, opts: Option<&CallOpts>) -> Result<Bytes, TransportError> {
        let default_opts = CallOpts::default();
        let opts = opts.unwrap_or(&default_opts);
        self.caller.code_at(&opts.context, &self.address, opts.block)
    }
}

impl fmt::Debug for BoundContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundContract")
            .field("address", &self.address)
            .field("interface", &self.interface.name())
            .finish_non_exhaustive()
    }
}
