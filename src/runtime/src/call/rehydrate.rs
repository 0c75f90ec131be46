//! Turning a packaged function back into something callable.
//!
//! The worker binds the captured globals into an explicit environment,
//! resolves the target against the [`Registry`] and invokes it. A panic in
//! the function body is caught and reported like any other remote error.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::exception::RemoteException;
use boxcall_core::packaged::{CallableRef, PackagedFunction};
use serde_json::Value;

use super::registry::{CallResult, FunctionHandler, Invocation, MethodDispatcher, Registry};

/// Exception type reported for a panicking function body.
pub const PANIC_EXCEPTION: &str = "panic";

/// Module imports and global values visible to a rehydrated function.
#[derive(Debug, Clone)]
pub struct Bindings<'r> {
    registry: &'r Registry,
    modules: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
}

impl<'r> Bindings<'r> {
    /// An environment with nothing bound.
    pub fn empty(registry: &'r Registry) -> Self {
        Self {
            registry,
            modules: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Import path bound to `alias`.
    pub fn module_path(&self, alias: &str) -> Option<&str> {
        self.modules.get(alias).map(String::as_str)
    }

    /// Call a function of a module bound in this environment.
    #[track_caller]
    pub fn call_module(&self, alias: &str, function: &str, args: &[Value]) -> CallResult {
        let path = self.module_path(alias).ok_or_else(|| {
            RemoteException::new("NameError", format!("name '{}' is not defined", alias))
        })?;
        let qualified = format!("{}::{}", path, function);
        let handler = self.registry.function(&qualified).ok_or_else(|| {
            RemoteException::new(
                "AttributeError",
                format!("module '{}' has no function '{}'", path, function),
            )
        })?;
        let kwargs = BTreeMap::new();
        handler(&Invocation::new(args, &kwargs, self))
    }
}

/// Bind captured modules and values for a function about to run.
///
/// Every module must be known to the registry; values are bound as-is.
pub fn bind_environment<'r>(
    registry: &'r Registry,
    modules: &BTreeMap<String, String>,
    values: &BTreeMap<String, Value>,
) -> Result<Bindings<'r>> {
    for (alias, path) in modules {
        if !registry.has_module(path) {
            return Err(BoxcallError::ImportError(format!(
                "no module named '{}' (bound as '{}')",
                path, alias
            )));
        }
    }

    tracing::debug!(
        modules = modules.len(),
        values = values.len(),
        "Bound function environment"
    );

    Ok(Bindings {
        registry,
        modules: modules.clone(),
        values: values.clone(),
    })
}

/// Return value and receiver state of a completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub return_value: Value,
    /// Receiver state after the call; `Some` only for bound methods.
    pub receiver_state: Option<Value>,
}

enum Resolved {
    Function(FunctionHandler),
    Method {
        receiver: Value,
        method: String,
        dispatch: MethodDispatcher,
    },
}

/// A resolved, ready-to-invoke callable.
pub struct Target {
    name: String,
    resolved: Resolved,
}

impl Target {
    /// Display name, `module::name` or `Type::method`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_method(&self) -> bool {
        matches!(self.resolved, Resolved::Method { .. })
    }

    /// Run the callable with the given arguments and environment.
    pub fn invoke(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        env: &Bindings<'_>,
    ) -> std::result::Result<Outcome, RemoteException> {
        let call = Invocation::new(args, kwargs, env);
        let result = panic::catch_unwind(AssertUnwindSafe(|| match &self.resolved {
            Resolved::Function(handler) => handler(&call).map(|return_value| Outcome {
                return_value,
                receiver_state: None,
            }),
            Resolved::Method {
                receiver,
                method,
                dispatch,
            } => dispatch(receiver.clone(), method.as_str(), &call).map(|(return_value, state)| Outcome {
                return_value,
                receiver_state: Some(state),
            }),
        }));

        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "function panicked".to_string());
                Err(RemoteException::new(PANIC_EXCEPTION, message).in_function(self.name.clone()))
            }
        }
    }
}

/// Resolve the target of a packaged function.
///
/// A bound method needs its receiver type in the registry. An unbound
/// function must already have been resolved by the caller and passed as
/// `provided`.
pub fn rehydrate(
    registry: &Registry,
    packaged: &PackagedFunction,
    provided: Option<FunctionHandler>,
) -> Result<Target> {
    match packaged.target() {
        CallableRef::Bound {
            receiver_type,
            receiver,
            method_name,
        } => {
            let dispatch = registry
                .dispatcher(receiver_type)
                .ok_or_else(|| BoxcallError::MissingReceiverType(receiver_type.clone()))?;
            Ok(Target {
                name: format!("{}::{}", receiver_type, method_name),
                resolved: Resolved::Method {
                    receiver: receiver.clone(),
                    method: method_name.clone(),
                    dispatch,
                },
            })
        }
        CallableRef::Unbound { qualified_name } => {
            let handler = provided
                .ok_or_else(|| BoxcallError::FunctionNotFound(qualified_name.clone()))?;
            Ok(Target {
                name: qualified_name.clone(),
                resolved: Resolved::Function(handler),
            })
        }
    }
}
