use async_trait::async_trait;
use bytes::Bytes;
use callbatch_core::{Address, BlockTag};
use tracing::{debug, trace};

use crate::transport::{CallContext, CallMsg, ContractCaller, Outcome, TransportError};

/// One entry of an aggregated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
    pub target: Address,
    pub payload: Bytes,
}

/// Result of one entry of an aggregated request. A failed entry carries the
/// remote's failure data instead of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReply {
    pub success: bool,
    pub data: Bytes,
}

impl CallReply {
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            data: data.into(),
        }
    }

    pub fn failure(data: impl Into<Bytes>) -> Self {
        Self {
            success: false,
            data: data.into(),
        }
    }
}

/// Performs one round trip for a list of requests.
///
/// Implementations must return exactly one reply per request, in request
/// order.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(
        &self,
        requests: Vec<AggregateRequest>,
        block: BlockTag,
    ) -> Result<Vec<CallReply>, TransportError>;
}

/// Aggregator that replays every request against a single-call transport,
/// one after another. Useful where no aggregation endpoint is deployed.
#[derive(Debug, Clone)]
pub struct LoopbackAggregator<C> {
    caller: C,
}

impl<C: ContractCaller> LoopbackAggregator<C> {
    pub fn new(caller: C) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> &C {
        &self.caller
    }
}

#[async_trait]
impl<C: ContractCaller> Aggregator for LoopbackAggregator<C> {
    async fn aggregate(
        &self,
        requests: Vec<AggregateRequest>,
        block: BlockTag,
    ) -> Result<Vec<CallReply>, TransportError> {
        debug!(requests = requests.len(), %block, "replaying batch call by call");
        let ctx = CallContext::new();
        let mut replies = Vec::with_capacity(requests.len());

        for request in requests {
            let msg = CallMsg::new(request.target, request.payload);
            let reply = match self.caller.call_contract(&ctx, msg, block) {
                Ok(Outcome::Executed(data)) => CallReply::success(data),
                Ok(Outcome::Deferred) => {
                    return Err(TransportError::Unsupported(
                        "deferring transport inside loopback aggregation",
                    ))
                }
                Err(TransportError::Remote(reason)) => CallReply::failure(reason.into_bytes()),
                Err(e) => return Err(e),
            };
            trace!(address = %request.target, success = reply.success, "loopback reply");
            replies.push(reply);
        }

        Ok(replies)
    }
}
