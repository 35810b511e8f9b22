pub mod aggregate;
pub mod bound;
pub mod transport;

pub use aggregate::{AggregateRequest, Aggregator, CallReply, LoopbackAggregator};
pub use bound::{BoundContract, Reply};
pub use transport::{
    pack_call, CallContext, CallMsg, CallOpts, CaptureSpec, ContractCaller, Outcome,
    TransportError,
};
