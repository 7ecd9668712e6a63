//! Opaque transportable values
//!
//! Every value crossing a task boundary travels as a [`TransportableObject`]:
//! an opaque payload plus a content-type tag. The dispatcher core never
//! introspects the payload between the graph boundary and an executor;
//! materialization happens only inside executors and post-processing.
//!
//! Callables cross the wire as a [`CallableRef`] payload. The executor
//! resolves the reference against its process-wide registry of named task
//! functions.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LatticeError, Result};

/// Content type of JSON-encoded payloads
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// An opaque serialized value with a content-type tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportableObject {
    /// Serialized payload (UTF-8 JSON text)
    data: String,

    /// Content-type tag of the payload
    content_type: String,
}

impl TransportableObject {
    /// Encode a host value into a transportable
    pub fn wrap<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(value)?,
            content_type: CONTENT_TYPE_JSON.to_string(),
        })
    }

    /// Decode the payload into a host value
    pub fn materialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }

    /// Decode the payload into a raw JSON value
    pub fn materialize_value(&self) -> Result<Value> {
        self.materialize()
    }

    /// The raw serialized payload
    pub fn payload(&self) -> &str {
        &self.data
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Encode a callable reference into a transportable
    pub fn wrap_callable(callable: &CallableRef) -> Result<Self> {
        Self::wrap(callable)
    }

    /// Decode the payload as a callable reference
    pub fn materialize_callable(&self) -> Result<CallableRef> {
        self.materialize()
            .map_err(|_| LatticeError::Malformed(format!("not a callable payload: {}", self.data)))
    }
}

/// Reference to a named function in the executor-side callable registry
///
/// The Rust rendering of a serialized callable: the wire carries the name
/// (and docstring) of a function the executing process registered natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableRef {
    /// Registered function name
    pub name: String,

    /// Docstring, carried for the persisted result document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl CallableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), doc: None }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_materialize_round_trip() {
        let wrapped = TransportableObject::wrap(&json!({"a": 1, "b": [1, 2, 3]})).unwrap();
        assert_eq!(wrapped.content_type(), CONTENT_TYPE_JSON);
        let value = wrapped.materialize_value().unwrap();
        assert_eq!(value, json!({"a": 1, "b": [1, 2, 3]}));
    }

    #[test]
    fn test_typed_materialize() {
        let wrapped = TransportableObject::wrap(&42i64).unwrap();
        let n: i64 = wrapped.materialize().unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn test_callable_round_trip() {
        let callable = CallableRef::new("square").with_doc("Square a number");
        let wrapped = TransportableObject::wrap_callable(&callable).unwrap();
        let back = wrapped.materialize_callable().unwrap();
        assert_eq!(back, callable);
    }

    #[test]
    fn test_non_callable_payload_is_rejected() {
        let wrapped = TransportableObject::wrap(&json!([1, 2])).unwrap();
        assert!(wrapped.materialize_callable().is_err());
    }

    #[test]
    fn test_nan_payload_renders_null() {
        let wrapped = TransportableObject::wrap(&f64::NAN).unwrap();
        assert_eq!(wrapped.payload(), "null");
    }
}
