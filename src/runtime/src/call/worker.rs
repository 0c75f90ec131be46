//! The remote side of a call.
//!
//! Runs inside the provisioned image, in the directory holding the job
//! inputs. Reads the packaged function, resolves it, invokes it and writes
//! either the return value (plus receiver state for bound methods) or the
//! exception and its traceback. Exactly one of the two outcomes is written.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use boxcall_core::artifacts::{
    EXCEPTION, FUNCTION_ARTIFACT, RECEIVER_STATE, RETURN_VALUE, SOURCE_TEXT, TRACEBACK_TEXT,
};
use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::exception::{Frame, RemoteException};
use boxcall_core::packaged::{CallableRef, PackagedFunction};

use super::registry::{FunctionHandler, Registry};
use super::rehydrate::{bind_environment, rehydrate, Outcome};

/// Function name of the frame the worker adds outside every remote error.
const WORKER_FRAME: &str = "boxcall::worker::run_job";

/// Names introduced by shipped source text.
///
/// `use path::name;` (optionally `as alias`) brings a registered function
/// into scope; a `fn name` item declares one defined alongside the call's
/// own module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceScope {
    imports: BTreeMap<String, String>,
    definitions: BTreeSet<String>,
}

impl SourceScope {
    pub fn parse(text: &str) -> Self {
        let mut scope = Self::default();
        for line in text.lines() {
            let item = strip_visibility(line.trim());
            if let Some(path) = item.strip_prefix("use ") {
                let path = path.trim_end_matches(';').trim();
                let (path, alias) = match path.split_once(" as ") {
                    Some((path, alias)) => (path.trim(), alias.trim()),
                    None => (path, path.rsplit("::").next().unwrap_or(path)),
                };
                scope.imports.insert(alias.to_string(), path.to_string());
            } else if let Some(rest) = item.strip_prefix("fn ") {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    scope.definitions.insert(name);
                }
            }
        }
        scope
    }

    /// Resolve `qualified_name` through the names this source introduces.
    pub fn resolve(&self, registry: &Registry, qualified_name: &str) -> Result<FunctionHandler> {
        let name = qualified_name.rsplit("::").next().unwrap_or(qualified_name);

        if let Some(path) = self.imports.get(name) {
            return registry
                .function(path)
                .ok_or_else(|| BoxcallError::ImportError(format!("cannot import '{}'", path)));
        }
        if self.definitions.contains(name) {
            return registry
                .function(qualified_name)
                .ok_or_else(|| BoxcallError::FunctionNotFound(qualified_name.to_string()));
        }
        Err(BoxcallError::FunctionNotFound(format!(
            "'{}' is not introduced by the shipped source",
            qualified_name
        )))
    }
}

fn strip_visibility(item: &str) -> &str {
    if let Some(rest) = item.strip_prefix("pub(") {
        return rest.split_once(')').map(|(_, r)| r.trim_start()).unwrap_or(item);
    }
    item.strip_prefix("pub ").unwrap_or(item)
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Returned,
    Raised,
}

/// Run the job whose inputs are in `dir`, writing its outputs next to them.
///
/// Errors only when the outputs themselves cannot be written or the
/// packaged function cannot be read; every failure of the call itself is
/// reported through the exception artifact.
pub fn run_job(registry: &Registry, dir: &Path) -> Result<Disposition> {
    let artifact = fs::read(dir.join(FUNCTION_ARTIFACT))?;
    let source = match fs::read_to_string(dir.join(SOURCE_TEXT)) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    match execute(registry, &artifact, source.as_deref()) {
        Ok(outcome) => {
            // Return value last: its presence means the outcome is complete.
            let return_value = serde_json::to_vec(&outcome.return_value)?;
            if let Some(state) = &outcome.receiver_state {
                fs::write(dir.join(RECEIVER_STATE), serde_json::to_vec(state)?)?;
            }
            fs::write(dir.join(RETURN_VALUE), return_value)?;
            tracing::info!("Remote call returned");
            Ok(Disposition::Returned)
        }
        Err(mut exception) => {
            exception.push_frame(Frame::new(file!(), line!(), WORKER_FRAME));
            fs::write(dir.join(TRACEBACK_TEXT), exception.render_traceback())?;
            fs::write(dir.join(EXCEPTION), serde_json::to_vec(&exception)?)?;
            tracing::info!(
                exception = %exception.type_name,
                message = %exception.message,
                "Remote call raised"
            );
            Ok(Disposition::Raised)
        }
    }
}

fn execute(
    registry: &Registry,
    artifact: &[u8],
    source: Option<&str>,
) -> std::result::Result<Outcome, RemoteException> {
    let packaged = PackagedFunction::from_artifact(artifact).map_err(as_exception)?;

    let provided = match packaged.target() {
        CallableRef::Unbound { qualified_name } => Some(
            match source {
                Some(text) => SourceScope::parse(text).resolve(registry, qualified_name),
                None => registry
                    .function(qualified_name)
                    .ok_or_else(|| BoxcallError::FunctionNotFound(qualified_name.clone())),
            }
            .map_err(as_exception)?,
        ),
        CallableRef::Bound { .. } => None,
    };

    let target = rehydrate(registry, &packaged, provided).map_err(as_exception)?;
    let env = bind_environment(registry, packaged.global_modules(), packaged.global_values())
        .map_err(as_exception)?;

    tracing::debug!(target = target.name(), "Invoking rehydrated function");
    target.invoke(packaged.args(), packaged.kwargs(), &env)
}

#[track_caller]
fn as_exception(err: BoxcallError) -> RemoteException {
    let type_name = match &err {
        BoxcallError::SerializationError(_) => "DeserializationError",
        BoxcallError::MissingReceiverType(_) => "MissingReceiverTypeError",
        BoxcallError::FunctionNotFound(_) => "FunctionNotFoundError",
        BoxcallError::ImportError(_) => "ImportError",
        _ => "WorkerError",
    };
    RemoteException::new(type_name, err.to_string()).in_function(WORKER_FRAME)
}

/// Entry point for a worker binary: run the job in the directory given as
/// the first argument, or the current directory.
///
/// ```no_run
/// use boxcall_runtime::call::Registry;
///
/// fn main() -> std::process::ExitCode {
///     let mut registry = Registry::new();
///     registry.register_function("jobs", "ping", |_| Ok(serde_json::json!("pong")));
///     boxcall_runtime::call::worker_main(&registry)
/// }
/// ```
pub fn worker_main(registry: &Registry) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let dir = std::env::args_os()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    match run_job(registry, &dir) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, dir = %dir.display(), "Worker failed");
            ExitCode::FAILURE
        }
    }
}
