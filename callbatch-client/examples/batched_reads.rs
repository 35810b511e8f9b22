// Rust Client Example: Batched Reads
// Records two typed calls, then executes them in one aggregated round trip
// against an in-process node.

use anyhow::Result;
use bytes::Bytes;
use callbatch_client::{capture, init_logging, BatchExecutor, ExecutorConfig, Recorder};
use callbatch_core::{split_payload, Address, BlockTag, CallQueue, Interface, JsonInterface, Slot};
use callbatch_transport::{
    BoundContract, CallContext, CallMsg, CallOpts, ContractCaller, LoopbackAggregator, Outcome,
    Reply, TransportError,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn settings() -> Arc<dyn Interface> {
    Arc::new(
        JsonInterface::new("RocketDAOProtocolSettingsDeposit")
            .method("getDepositEnabled()")
            .method("getMinimumDeposit()"),
    )
}

struct DepositSettings(BoundContract);

impl DepositSettings {
    fn new(address: Address, caller: Arc<dyn ContractCaller>) -> Result<Self, TransportError> {
        Ok(Self(BoundContract::new(address, settings(), caller)))
    }

    fn get_deposit_enabled(&self, opts: Option<&CallOpts>) -> Result<Reply<bool>, TransportError> {
        self.0.call(opts, "getDepositEnabled", &[])
    }

    fn get_minimum_deposit(&self, opts: Option<&CallOpts>) -> Result<Reply<u64>, TransportError> {
        self.0.call(opts, "getMinimumDeposit", &[])
    }
}

/// Answers from fixed state, standing in for a remote node.
struct Node;

impl ContractCaller for Node {
    fn call_contract(
        &self,
        _ctx: &CallContext,
        msg: CallMsg,
        _block: BlockTag,
    ) -> Result<Outcome, TransportError> {
        let (selector, _) = split_payload(&msg.data)
            .ok_or_else(|| TransportError::Remote("malformed payload".into()))?;
        let value = match settings().method_by_selector(selector) {
            Some("getDepositEnabled") => json!(true),
            Some("getMinimumDeposit") => json!(10_000_000_000_000_000u64),
            _ => return Err(TransportError::Remote(format!("unknown selector {selector}"))),
        };
        Ok(Outcome::Executed(JsonInterface::encode_response(&value)))
    }

    fn code_at(
        &self,
        _ctx: &CallContext,
        _address: &Address,
        _block: BlockTag,
    ) -> Result<Bytes, TransportError> {
        Ok(Bytes::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(None)?;

    let address: Address = "0x1d8f8f00cfa6758d7be78336684788fb0ee0fa46".parse()?;
    let recorder = Recorder::new(address, settings(), DepositSettings::new)?;
    let queue = CallQueue::new();

    let enabled: Slot<bool> = Slot::new();
    let minimum: Slot<u64> = Slot::new();
    recorder.open(&queue, || {
        capture!(recorder, &enabled => get_deposit_enabled(None))?;
        capture!(recorder, &minimum => get_minimum_deposit(None))?;
        Ok(())
    })?;
    info!(calls = queue.len(), "recorded");

    let executor = BatchExecutor::with_config(
        LoopbackAggregator::new(Node),
        ExecutorConfig {
            timeout_ms: 5000,
            ..Default::default()
        },
    );
    let report = executor.execute_queue(&queue).await?;

    info!(
        batch = %report.batch_id,
        enabled = ?enabled.get(),
        minimum = ?minimum.get(),
        "batch resolved"
    );
    Ok(())
}
