//! Functions, receiver types and modules known to a worker.
//!
//! Rust code can't travel as data, so the remote side resolves every
//! callable by name against a [`Registry`] compiled into the worker binary.
//! Functions are registered under `module::name`; registering a function
//! also makes its module importable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use boxcall_core::exception::RemoteException;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::rehydrate::Bindings;

/// Outcome of a remote function body.
pub type CallResult = std::result::Result<Value, RemoteException>;

/// A registered free function.
pub type FunctionHandler = Arc<dyn Fn(&Invocation<'_>) -> CallResult + Send + Sync>;

/// Deserializes a receiver, runs a method, and returns
/// `(return value, receiver state after the call)`.
pub(crate) type MethodDispatcher = Arc<
    dyn Fn(Value, &str, &Invocation<'_>) -> std::result::Result<(Value, Value), RemoteException>
        + Send
        + Sync,
>;

/// A type whose instances can be shipped as the receiver of a method call.
pub trait RemoteType: Serialize + DeserializeOwned + 'static {
    /// Name the type is registered under on both sides.
    const TYPE_NAME: &'static str;

    /// Definition text shipped when source sending is enabled.
    fn source() -> Option<&'static str> {
        None
    }

    /// Dispatch a method by name.
    fn call_method(&mut self, method: &str, call: &Invocation<'_>) -> CallResult;
}

/// Arguments and bound globals of one invocation.
pub struct Invocation<'a> {
    args: &'a [Value],
    kwargs: &'a BTreeMap<String, Value>,
    env: &'a Bindings<'a>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        args: &'a [Value],
        kwargs: &'a BTreeMap<String, Value>,
        env: &'a Bindings<'a>,
    ) -> Self {
        Self { args, kwargs, env }
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        self.kwargs
    }

    pub fn env(&self) -> &Bindings<'a> {
        self.env
    }

    /// Positional argument `index`, decoded.
    #[track_caller]
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> std::result::Result<T, RemoteException> {
        let value = self.args.get(index).ok_or_else(|| {
            RemoteException::new(
                "TypeError",
                format!("missing positional argument {}", index),
            )
        })?;
        decode(value, || format!("argument {}", index))
    }

    /// Keyword argument `name`, decoded; `None` when not passed.
    #[track_caller]
    pub fn kwarg<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> std::result::Result<Option<T>, RemoteException> {
        match self.kwargs.get(name) {
            Some(value) => decode(value, || format!("keyword argument '{}'", name)).map(Some),
            None => Ok(None),
        }
    }

    /// Captured global value `name`, decoded.
    #[track_caller]
    pub fn global<T: DeserializeOwned>(&self, name: &str) -> std::result::Result<T, RemoteException> {
        let value = self.env.value(name).ok_or_else(|| {
            RemoteException::new("NameError", format!("name '{}' is not defined", name))
        })?;
        decode(value, || format!("global '{}'", name))
    }

    /// Call `function` of the module imported as `alias`.
    #[track_caller]
    pub fn call_module(&self, alias: &str, function: &str, args: &[Value]) -> CallResult {
        self.env.call_module(alias, function, args)
    }
}

#[track_caller]
fn decode<T: DeserializeOwned>(
    value: &Value,
    what: impl FnOnce() -> String,
) -> std::result::Result<T, RemoteException> {
    serde_json::from_value(value.clone())
        .map_err(|e| RemoteException::new("TypeError", format!("{}: {}", what(), e)))
}

/// Everything a worker can run.
#[derive(Default, Clone)]
pub struct Registry {
    functions: HashMap<String, FunctionHandler>,
    modules: HashSet<String>,
    types: HashMap<String, MethodDispatcher>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module::name`.
    pub fn register_function<F>(&mut self, module: &str, name: &str, function: F) -> &mut Self
    where
        F: Fn(&Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.modules.insert(module.to_string());
        self.functions
            .insert(format!("{}::{}", module, name), Arc::new(function));
        self
    }

    /// Register a receiver type for bound-method calls.
    pub fn register_type<T: RemoteType>(&mut self) -> &mut Self {
        let dispatcher: MethodDispatcher =
            Arc::new(|state: Value, method: &str, call: &Invocation<'_>| {
                let mut receiver: T = serde_json::from_value(state).map_err(|e| {
                    RemoteException::new(
                        "DeserializationError",
                        format!("cannot restore {}: {}", T::TYPE_NAME, e),
                    )
                })?;
                let value = receiver.call_method(method, call)?;
                let state = serde_json::to_value(&receiver).map_err(|e| {
                    RemoteException::new(
                        "SerializationError",
                        format!("cannot save {}: {}", T::TYPE_NAME, e),
                    )
                })?;
                Ok((value, state))
            });
        self.types.insert(T::TYPE_NAME.to_string(), dispatcher);
        self
    }

    /// Look up a function by qualified name.
    pub fn function(&self, qualified_name: &str) -> Option<FunctionHandler> {
        self.functions.get(qualified_name).cloned()
    }

    pub fn has_module(&self, path: &str) -> bool {
        self.modules.contains(path)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub(crate) fn dispatcher(&self, type_name: &str) -> Option<MethodDispatcher> {
        self.types.get(type_name).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut types: Vec<&String> = self.types.keys().collect();
        types.sort();
        f.debug_struct("Registry")
            .field("functions", &functions)
            .field("types", &types)
            .finish()
    }
}
