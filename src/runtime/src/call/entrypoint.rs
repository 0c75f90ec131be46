//! Job inputs for a remote call.
//!
//! A job always receives the bootstrap script and the packaged function.
//! Source text is added depending on the source policy:
//!
//! | send source | callable       | source text                   |
//! |-------------|----------------|-------------------------------|
//! | yes         | any            | definition text (required)    |
//! | no          | free function  | `use module::name;` line      |
//! | no          | bound method   | none                          |

use boxcall_core::artifacts::{BOOTSTRAP_SCRIPT, FUNCTION_ARTIFACT, SOURCE_TEXT};
use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::JobInputs;

use super::packager::{capture, Call, Callable};

/// Worker binary the bootstrap script hands over to.
pub const WORKER_BINARY: &str = "boxcall-worker";

/// Contents of the bootstrap script.
pub const BOOTSTRAP: &str = "#!/bin/sh\nset -e\ncd \"$(dirname \"$0\")\"\nexec boxcall-worker \"$PWD\"\n";

/// Build the job inputs for `call`.
pub fn assemble(call: &Call, send_source: bool) -> Result<JobInputs> {
    let packaged = capture(&call.callable, &call.arguments)?;

    let mut inputs = JobInputs::new();
    inputs.insert(BOOTSTRAP_SCRIPT.to_string(), BOOTSTRAP.as_bytes().to_vec());
    inputs.insert(FUNCTION_ARTIFACT.to_string(), packaged.to_artifact()?);
    if let Some(text) = source_text(&call.callable, send_source)? {
        inputs.insert(SOURCE_TEXT.to_string(), text.into_bytes());
    }

    tracing::debug!(
        target = %call.callable.qualified_name(),
        send_source,
        files = inputs.len(),
        "Assembled job inputs"
    );
    Ok(inputs)
}

fn source_text(callable: &Callable, send_source: bool) -> Result<Option<String>> {
    if send_source {
        return callable
            .source()
            .map(|text| Some(text.to_string()))
            .ok_or_else(|| BoxcallError::SourceUnavailable(callable.qualified_name()));
    }

    match callable.module_path() {
        Some(module) => Ok(Some(format!("use {}::{};\n", module, callable.name()))),
        None => Ok(None),
    }
}
