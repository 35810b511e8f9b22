// Typed client and in-memory node shared by the integration tests
#![allow(dead_code)]

use bytes::Bytes;
use callbatch_core::{Address, BlockTag, Interface, JsonInterface, split_payload};
use callbatch_transport::{
    BoundContract, CallContext, CallMsg, CallOpts, ContractCaller, Outcome, Reply, TransportError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn demo_interface() -> Arc<dyn Interface> {
    Arc::new(
        JsonInterface::new("Demo")
            .method("GetFoo()")
            .method("GetBar()")
            .method("GetBalance(address)")
            .method("Revert()"),
    )
}

pub fn demo_address() -> Address {
    Address::new([0xd0; 20])
}

/// Hand-written equivalent of a generated typed client.
pub struct Demo {
    contract: BoundContract,
}

impl Demo {
    pub fn new(address: Address, caller: Arc<dyn ContractCaller>) -> Result<Self, TransportError> {
        Ok(Self {
            contract: BoundContract::new(address, demo_interface(), caller),
        })
    }

    pub fn get_foo(&self, opts: Option<&CallOpts>) -> Result<Reply<u64>, TransportError> {
        self.contract.call(opts, "GetFoo", &[])
    }

    pub fn get_bar(&self, opts: Option<&CallOpts>) -> Result<Reply<String>, TransportError> {
        self.contract.call(opts, "GetBar", &[])
    }

    pub fn get_balance(
        &self,
        opts: Option<&CallOpts>,
        owner: Address,
    ) -> Result<Reply<u64>, TransportError> {
        self.contract.call(opts, "GetBalance", &[json!(owner)])
    }

    pub fn revert(&self, opts: Option<&CallOpts>) -> Result<Reply<bool>, TransportError> {
        self.contract.call(opts, "Revert", &[])
    }

    pub fn code(&self) -> Result<Bytes, TransportError> {
        self.contract.code(None)
    }
}

/// Node answering the demo interface from fixed state.
#[derive(Default)]
pub struct MockNode {
    pub balances: HashMap<Address, u64>,
    pub calls: Mutex<Vec<(Address, BlockTag)>>,
}

impl MockNode {
    pub fn with_balance(mut self, owner: Address, balance: u64) -> Self {
        self.balances.insert(owner, balance);
        self
    }

    fn answer(&self, method: &str, args: &[Value]) -> Result<Value, TransportError> {
        match method {
            "GetFoo" => Ok(json!(42)),
            "GetBar" => Ok(json!("bar")),
            "GetBalance" => {
                let owner: Address = args
                    .first()
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| TransportError::Remote("bad owner".into()))?;
                Ok(json!(self.balances.get(&owner).copied().unwrap_or_default()))
            }
            "Revert" => Err(TransportError::Remote("execution reverted".into())),
            other => Err(TransportError::Remote(format!("no method {other}"))),
        }
    }
}

impl ContractCaller for MockNode {
    fn call_contract(
        &self,
        _ctx: &CallContext,
        msg: CallMsg,
        block: BlockTag,
    ) -> Result<Outcome, TransportError> {
        self.calls.lock().unwrap().push((msg.to, block));
        let iface = demo_interface();
        let (selector, args) = split_payload(&msg.data)
            .ok_or_else(|| TransportError::Remote("malformed payload".into()))?;
        let method = iface
            .method_by_selector(selector)
            .ok_or_else(|| TransportError::Remote(format!("unknown selector {selector}")))?
            .to_string();
        let value = self.answer(&method, &args)?;
        Ok(Outcome::Executed(JsonInterface::encode_response(&value)))
    }

    fn code_at(
        &self,
        _ctx: &CallContext,
        _address: &Address,
        _block: BlockTag,
    ) -> Result<Bytes, TransportError> {
        Ok(Bytes::from_static(b"\x60\x80\x60\x40"))
    }
}
