use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

use crate::error::{DecodeError, EncodeError};
use crate::ids::Selector;

/// Interface descriptor of a remote-callable entity.
///
/// Argument and response encoding is delegated to implementations of this
/// trait; the batching layer only needs to name methods, pack arguments and
/// unpack responses into a dynamic value.
pub trait Interface: Send + Sync + fmt::Debug {
    /// Name of the interface, used in diagnostics.
    fn name(&self) -> &str;

    /// Resolves the method an encoded payload invokes.
    fn method_by_selector(&self, selector: Selector) -> Option<&str>;

    fn pack(&self, method: &str, args: &[Value]) -> Result<Bytes, EncodeError>;

    fn unpack(&self, method: &str, raw: &[u8]) -> Result<Value, DecodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodEntry {
    name: String,
    signature: String,
}

/// Interface codec using a hashed-signature selector followed by a JSON
/// array of arguments. Responses are plain JSON documents.
#[derive(Debug, Clone, Default)]
pub struct JsonInterface {
    name: String,
    methods: IndexMap<Selector, MethodEntry>,
}

impl JsonInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: IndexMap::new(),
        }
    }

    /// Adds a method by signature, e.g. `getGuardian()` or
    /// `getAddress(bytes32)`.
    pub fn method(mut self, signature: &str) -> Self {
        let name = signature
            .split_once('(')
            .map(|(name, _)| name)
            .unwrap_or(signature)
            .trim()
            .to_string();
        let signature = if signature.contains('(') {
            signature.trim().to_string()
        } else {
            format!("{}()", name)
        };
        self.methods.insert(
            Selector::from_signature(&signature),
            MethodEntry { name, signature },
        );
        self
    }

    pub fn selector_of(&self, method: &str) -> Option<Selector> {
        self.methods
            .iter()
            .find(|(_, entry)| entry.name == method)
            .map(|(selector, _)| *selector)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.values().map(|entry| entry.name.as_str())
    }

    /// Encodes a response document the way [`Interface::unpack`] expects it.
    pub fn encode_response(value: &Value) -> Bytes {
        Bytes::from(value.to_string())
    }
}

impl Interface for JsonInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn method_by_selector(&self, selector: Selector) -> Option<&str> {
        self.methods.get(&selector).map(|entry| entry.name.as_str())
    }

    fn pack(&self, method: &str, args: &[Value]) -> Result<Bytes, EncodeError> {
        let selector = self
            .selector_of(method)
            .ok_or_else(|| EncodeError::UnknownMethod {
                interface: self.name.clone(),
                method: method.to_string(),
            })?;
        let body = serde_json::to_vec(args).map_err(|e| EncodeError::Arguments {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        let mut buf = BytesMut::with_capacity(Selector::LEN + body.len());
        buf.put_slice(selector.as_bytes());
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    fn unpack(&self, method: &str, raw: &[u8]) -> Result<Value, DecodeError> {
        if self.selector_of(method).is_none() {
            return Err(DecodeError::UnknownMethod {
                interface: self.name.clone(),
                method: method.to_string(),
            });
        }
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Splits a payload produced by [`JsonInterface::pack`] into its selector and
/// argument list.
pub fn split_payload(payload: &[u8]) -> Option<(Selector, Vec<Value>)> {
    let selector = Selector::from_payload(payload)?;
    let args = serde_json::from_slice(&payload[Selector::LEN..]).ok()?;
    Some((selector, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage() -> JsonInterface {
        JsonInterface::new("RocketStorage")
            .method("getGuardian()")
            .method("getDeployedStatus")
            .method("getAddress(bytes32)")
    }

    #[test]
    fn test_method_table() {
        let iface = storage();
        let names: Vec<&str> = iface.methods().collect();
        assert_eq!(names, vec!["getGuardian", "getDeployedStatus", "getAddress"]);
        assert_eq!(
            iface.selector_of("getDeployedStatus"),
            Some(Selector::from_signature("getDeployedStatus()"))
        );
    }

    #[test]
    fn test_pack_prefixes_selector() {
        let iface = storage();
        let payload = iface.pack("getAddress", &[json!("contract.name")]).unwrap();
        let (selector, args) = split_payload(&payload).unwrap();
        assert_eq!(iface.method_by_selector(selector), Some("getAddress"));
        assert_eq!(args, vec![json!("contract.name")]);
    }

    #[test]
    fn test_pack_unknown_method() {
        let err = storage().pack("getNothing", &[]).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownMethod { .. }));
    }

    #[test]
    fn test_unpack_response() {
        let iface = storage();
        let raw = JsonInterface::encode_response(&json!(true));
        assert_eq!(iface.unpack("getDeployedStatus", &raw).unwrap(), json!(true));
    }

    #[test]
    fn test_unpack_errors() {
        let iface = storage();
        assert!(matches!(
            iface.unpack("getDeployedStatus", b"{not json"),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            iface.unpack("getNothing", b"true"),
            Err(DecodeError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_unknown_selector() {
        assert_eq!(storage().method_by_selector(Selector::new([0; 4])), None);
    }
}
