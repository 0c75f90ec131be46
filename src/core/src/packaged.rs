//! The packaged function artifact.
//!
//! A [`PackagedFunction`] is created once per remote call, never mutated,
//! and consumed exactly once by rehydration on the remote side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// What to invoke on the remote side, decided once at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallableRef {
    /// A method looked up on a deserialized receiver.
    Bound {
        receiver_type: String,
        receiver: Value,
        method_name: String,
    },
    /// A free function, resolved by the remote entrypoint.
    Unbound { qualified_name: String },
}

/// A function call packaged for remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagedFunction {
    target: CallableRef,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    /// Plain-data globals the function reads
    global_values: BTreeMap<String, Value>,
    /// Module globals, captured as name → import path
    global_modules: BTreeMap<String, String>,
}

impl PackagedFunction {
    pub fn new(
        target: CallableRef,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        global_values: BTreeMap<String, Value>,
        global_modules: BTreeMap<String, String>,
    ) -> Self {
        Self {
            target,
            args,
            kwargs,
            global_values,
            global_modules,
        }
    }

    pub fn target(&self) -> &CallableRef {
        &self.target
    }

    pub fn is_bound_method(&self) -> bool {
        matches!(self.target, CallableRef::Bound { .. })
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    pub fn global_values(&self) -> &BTreeMap<String, Value> {
        &self.global_values
    }

    pub fn global_modules(&self) -> &BTreeMap<String, String> {
        &self.global_modules
    }

    /// Encode as the function artifact.
    pub fn to_artifact(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode the function artifact.
    pub fn from_artifact(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
