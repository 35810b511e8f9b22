//! Call descriptors and queues for batching typed remote calls.
//!
//! Typed clients normally perform one round trip per call. The types here
//! describe such calls without executing them: a [`Call`] remembers where to
//! send a request, how to produce its payload, and which caller-owned
//! [`Slot`] its decoded response belongs in. Calls accumulate in a
//! [`CallQueue`] and are handed off as a [`Batch`] to whatever performs the
//! aggregated round trip.

pub mod call;
pub mod codec;
pub mod error;
pub mod ids;
pub mod slot;

pub use call::{Batch, Call, CallQueue};
pub use codec::{split_payload, Interface, JsonInterface};
pub use error::{ConfigError, DecodeError, EncodeError, ErrorCode, ParseIdError, ProtocolError};
pub use ids::{Address, BatchId, BlockTag, Selector};
pub use slot::{Destination, Slot};
