//! Capturing a call on the submitting side.
//!
//! A [`Callable`] names a registered function or a method of a
//! [`RemoteType`] receiver, and declares the free variables its body uses.
//! [`capture`] turns it and its [`Arguments`] into a [`PackagedFunction`].

use std::collections::BTreeMap;

use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::packaged::{CallableRef, PackagedFunction};
use serde::Serialize;
use serde_json::Value;

use super::registry::RemoteType;

/// A value that may have failed to serialize; the failure surfaces at capture.
type Captured = std::result::Result<Value, String>;

fn to_captured<T: Serialize + ?Sized>(value: &T) -> Captured {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
enum FreeVariable {
    /// A module-level value, shipped by value.
    Global(Captured),
    /// A module reference, rebound by import path.
    Module(String),
    /// A variable of an enclosing function scope.
    Enclosing,
}

#[derive(Debug, Clone)]
enum Kind {
    Function {
        module: String,
    },
    Method {
        receiver_type: &'static str,
        receiver: Captured,
    },
}

/// A function or bound method to run remotely.
#[derive(Debug, Clone)]
pub struct Callable {
    kind: Kind,
    name: String,
    source: Option<String>,
    free_variables: Vec<(String, FreeVariable)>,
}

impl Callable {
    /// The function registered as `module::name`.
    pub fn function(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Function {
                module: module.into(),
            },
            name: name.into(),
            source: None,
            free_variables: Vec::new(),
        }
    }

    /// `method` bound to a snapshot of `receiver`.
    pub fn method<T: RemoteType>(receiver: &T, method: impl Into<String>) -> Self {
        Self {
            kind: Kind::Method {
                receiver_type: T::TYPE_NAME,
                receiver: to_captured(receiver),
            },
            name: method.into(),
            source: T::source().map(str::to_string),
            free_variables: Vec::new(),
        }
    }

    /// Declare a global value the body reads.
    pub fn global<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.free_variables
            .push((name.into(), FreeVariable::Global(to_captured(value))));
        self
    }

    /// Declare a module the body refers to as `alias`.
    pub fn module(mut self, alias: impl Into<String>, import_path: impl Into<String>) -> Self {
        self.free_variables
            .push((alias.into(), FreeVariable::Module(import_path.into())));
        self
    }

    /// Declare a captured variable of an enclosing scope. Such callables
    /// cannot be shipped.
    pub fn enclosing(mut self, name: impl Into<String>) -> Self {
        self.free_variables.push((name.into(), FreeVariable::Enclosing));
        self
    }

    /// Attach the definition text shipped when source sending is on.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound_method(&self) -> bool {
        matches!(self.kind, Kind::Method { .. })
    }

    /// Defining module of a free function.
    pub fn module_path(&self) -> Option<&str> {
        match &self.kind {
            Kind::Function { module } => Some(module.as_str()),
            Kind::Method { .. } => None,
        }
    }

    pub fn receiver_type(&self) -> Option<&str> {
        match &self.kind {
            Kind::Method { receiver_type, .. } => Some(*receiver_type),
            Kind::Function { .. } => None,
        }
    }

    /// `module::name` for functions, `Type::method` for methods.
    pub fn qualified_name(&self) -> String {
        match &self.kind {
            Kind::Function { module } => format!("{}::{}", module, self.name),
            Kind::Method { receiver_type, .. } => format!("{}::{}", receiver_type, self.name),
        }
    }

    /// Definition text: the function's own, or the receiver type's.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

/// Positional and keyword arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    args: Vec<Captured>,
    kwargs: Vec<(String, Captured)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(to_captured(value));
        self
    }

    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.kwargs.push((name.into(), to_captured(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A callable paired with the arguments to call it with.
#[derive(Debug, Clone)]
pub struct Call {
    pub callable: Callable,
    pub arguments: Arguments,
}

impl Call {
    pub fn new(callable: Callable, arguments: Arguments) -> Self {
        Self {
            callable,
            arguments,
        }
    }
}

/// Capture everything needed to run `callable` remotely.
///
/// Fails with [`BoxcallError::UnshippableClosure`] if any enclosing-scope
/// variable was declared, before any value is looked at.
pub fn capture(callable: &Callable, arguments: &Arguments) -> Result<PackagedFunction> {
    let closures: Vec<String> = callable
        .free_variables
        .iter()
        .filter(|(_, v)| matches!(v, FreeVariable::Enclosing))
        .map(|(name, _)| name.clone())
        .collect();
    if !closures.is_empty() {
        return Err(BoxcallError::UnshippableClosure { names: closures });
    }

    let mut global_values = BTreeMap::new();
    let mut global_modules = BTreeMap::new();
    for (name, variable) in &callable.free_variables {
        match variable {
            FreeVariable::Global(value) => {
                global_values.insert(name.clone(), resolve(value, || format!("global '{}'", name))?);
            }
            FreeVariable::Module(path) => {
                global_modules.insert(name.clone(), path.clone());
            }
            FreeVariable::Enclosing => {}
        }
    }

    let target = match &callable.kind {
        Kind::Function { module } => CallableRef::Unbound {
            qualified_name: format!("{}::{}", module, callable.name),
        },
        Kind::Method {
            receiver_type,
            receiver,
        } => CallableRef::Bound {
            receiver_type: receiver_type.to_string(),
            receiver: resolve(receiver, || format!("receiver of '{}'", callable.name))?,
            method_name: callable.name.clone(),
        },
    };

    let args = arguments
        .args
        .iter()
        .enumerate()
        .map(|(i, value)| resolve(value, || format!("argument {}", i)))
        .collect::<Result<Vec<_>>>()?;

    let mut kwargs = BTreeMap::new();
    for (name, value) in &arguments.kwargs {
        let value = resolve(value, || format!("keyword argument '{}'", name))?;
        if kwargs.insert(name.clone(), value).is_some() {
            return Err(BoxcallError::InvalidArgument(format!(
                "keyword argument '{}' given more than once",
                name
            )));
        }
    }

    tracing::debug!(
        target = %callable.qualified_name(),
        args = args.len(),
        kwargs = kwargs.len(),
        globals = global_values.len(),
        modules = global_modules.len(),
        "Captured call"
    );

    Ok(PackagedFunction::new(
        target,
        args,
        kwargs,
        global_values,
        global_modules,
    ))
}

fn resolve(value: &Captured, what: impl FnOnce() -> String) -> Result<Value> {
    value
        .clone()
        .map_err(|e| BoxcallError::SerializationError(format!("{}: {}", what(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::registry::{CallResult, Invocation};
    use serde::ser::Error as _;
    use serde::{Deserialize, Serializer};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Tally {
        total: u32,
    }

    impl RemoteType for Tally {
        const TYPE_NAME: &'static str = "Tally";

        fn source() -> Option<&'static str> {
            Some("struct Tally { total: u32 }")
        }

        fn call_method(&mut self, _: &str, _: &Invocation<'_>) -> CallResult {
            Ok(json!(self.total))
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("open file handle"))
        }
    }

    #[test]
    fn test_capture_function_with_globals_and_modules() {
        let callable = Callable::function("stats", "normalize")
            .global("SCALE", &2.5)
            .module("np", "numeric");
        let arguments = Arguments::new().arg(&[1, 2, 3]).kwarg("clip", &true);

        let packaged = capture(&callable, &arguments).unwrap();
        assert_eq!(
            packaged.target(),
            &CallableRef::Unbound {
                qualified_name: "stats::normalize".to_string()
            }
        );
        assert_eq!(packaged.args(), &[json!([1, 2, 3])]);
        assert_eq!(packaged.kwargs().get("clip"), Some(&json!(true)));
        assert_eq!(packaged.global_values().get("SCALE"), Some(&json!(2.5)));
        assert_eq!(packaged.global_modules().get("np").map(String::as_str), Some("numeric"));
        assert!(!packaged.global_values().contains_key("np"));
    }

    #[test]
    fn test_capture_bound_method_snapshots_receiver() {
        let tally = Tally { total: 4 };
        let callable = Callable::method(&tally, "read");
        assert!(callable.is_bound_method());
        assert_eq!(callable.qualified_name(), "Tally::read");
        assert_eq!(callable.source(), Some("struct Tally { total: u32 }"));

        let packaged = capture(&callable, &Arguments::new()).unwrap();
        assert!(packaged.is_bound_method());
        assert_eq!(
            packaged.target(),
            &CallableRef::Bound {
                receiver_type: "Tally".to_string(),
                receiver: json!({"total": 4}),
                method_name: "read".to_string(),
            }
        );
    }

    #[test]
    fn test_enclosing_variables_are_rejected_first() {
        let callable = Callable::function("jobs", "inner")
            .global("BROKEN", &Unserializable)
            .enclosing("offset")
            .enclosing("limit");
        let err = capture(&callable, &Arguments::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't launch a job with closure variables: offset, limit"
        );
    }

    #[test]
    fn test_unserializable_values_fail() {
        let callable = Callable::function("jobs", "run").global("HANDLE", &Unserializable);
        let err = capture(&callable, &Arguments::new()).unwrap_err();
        assert!(matches!(err, BoxcallError::SerializationError(ref m) if m.contains("HANDLE")));

        let callable = Callable::function("jobs", "run");
        let err = capture(&callable, &Arguments::new().arg(&Unserializable)).unwrap_err();
        assert!(matches!(err, BoxcallError::SerializationError(ref m) if m.contains("argument 0")));
    }

    #[test]
    fn test_duplicate_keyword_argument() {
        let callable = Callable::function("jobs", "run");
        let arguments = Arguments::new().kwarg("n", &1).kwarg("n", &2);
        let err = capture(&callable, &arguments).unwrap_err();
        assert!(matches!(err, BoxcallError::InvalidArgument(_)));
    }

    #[test]
    fn test_function_source() {
        let callable = Callable::function("jobs", "run");
        assert_eq!(callable.source(), None);
        assert_eq!(callable.module_path(), Some("jobs"));
        let callable = callable.with_source("fn run() {}");
        assert_eq!(callable.source(), Some("fn run() {}"));
    }
}
