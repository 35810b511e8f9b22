//! Capture typed client calls into a batch and execute them in one
//! aggregated round trip.
//!
//! Two capture backends feed the same [`CallQueue`]:
//!
//! - [`Recorder`] wraps a typed client and captures every call announced
//!   through its destination protocol while a session is open.
//! - [`DeferringCaller`] is a transport that captures any call carrying
//!   capture parameters in its context and answers it as deferred.
//!
//! The sealed [`Batch`] is then handed to a [`BatchExecutor`].

pub mod executor;
pub mod logging;
pub mod macros;
pub mod recorder;
pub mod shim;

pub use callbatch_core::{Batch, CallQueue, Slot};
pub use executor::{BatchExecutor, BatchReport, CallResult, CallStatus, ExecutorConfig, ExecutorError};
pub use logging::{init_logging, init_test_logging};
pub use recorder::Recorder;
pub use shim::DeferringCaller;

#[doc(hidden)]
pub use serde_json;
