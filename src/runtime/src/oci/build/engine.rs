//! Build engine for provisioning images through a build daemon.
//!
//! Submits an archived build context, drains the daemon's progress log and
//! recovers either the built image id or the failing log line.
//!
//! # Process
//!
//! 1. Submit the context archive with `rm=true` and an optional `pull=true`
//! 2. Decode each progress record; a record without a `stream` field is a
//!    daemon-level error and is returned immediately
//! 3. When the log ends, the last record decides the outcome: the daemon
//!    always finishes a successful build with `Successfully built <id>`

use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::JobInputs;

use super::archive::archive;
use super::context::assemble_context;

/// Success marker the daemon prints as the final record of a build.
const SUCCESS_TOKENS: [&str; 2] = ["Successfully", "built"];

/// Flags sent with a build request.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Remove intermediate containers after a successful build
    pub remove_intermediate: bool,
    /// The request body is a complete tar context, not a bare descriptor
    pub custom_context: bool,
    /// Always attempt to pull a newer base image
    pub pull: bool,
}

impl BuildOptions {
    pub fn new(pull: bool) -> Self {
        Self {
            remove_intermediate: true,
            custom_context: true,
            pull,
        }
    }
}

/// Line-oriented progress log of a running build.
///
/// Each item is one raw record. An `Err` item means the connection failed.
pub type ProgressStream<'a> = Box<dyn Iterator<Item = std::io::Result<String>> + 'a>;

/// A container build daemon.
pub trait BuildDaemon {
    /// Start a build and return its progress log.
    fn build(&self, context: Vec<u8>, options: &BuildOptions) -> Result<ProgressStream<'_>>;
}

/// Result of draining a build log.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built { image_id: String },
    Failed { raw_log: String },
}

/// Drives builds against a daemon.
///
/// Builds are synchronous: [`ImageBuilder::build`] blocks until the
/// daemon's log is exhausted. Concurrent builds of the same context are not
/// de-duplicated.
pub struct ImageBuilder<'a> {
    daemon: &'a dyn BuildDaemon,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(daemon: &'a dyn BuildDaemon) -> Self {
        Self { daemon }
    }

    /// Build an image from an archived context.
    pub fn build(&self, context: Vec<u8>, pull: bool) -> Result<BuildOutcome> {
        let options = BuildOptions::new(pull);
        let progress = self.daemon.build(context, &options)?;

        let mut last_text: Option<String> = None;
        for record in progress {
            let raw = match record {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, "Build daemon connection failed mid-stream");
                    break;
                }
            };
            if raw.trim().is_empty() {
                continue;
            }

            let text = parse_progress_record(&raw)?;
            tracing::info!("building image: {}", text.trim_end());
            last_text = Some(text);
        }

        Ok(parse_build_result(last_text.as_deref().unwrap_or("")))
    }
}

/// Extract the `stream` text of a progress record.
///
/// Anything else (undecodable JSON, error records, aux records) is returned
/// as a daemon error carrying the raw record.
pub fn parse_progress_record(raw: &str) -> Result<String> {
    let record: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| BoxcallError::DaemonError(raw.trim().to_string()))?;

    match record.get("stream").and_then(|s| s.as_str()) {
        Some(text) => Ok(text.to_string()),
        None => Err(BoxcallError::DaemonError(raw.trim().to_string())),
    }
}

/// Interpret the final record of a build log.
pub fn parse_build_result(last_text: &str) -> BuildOutcome {
    let tokens: Vec<&str> = last_text.split_whitespace().collect();
    match tokens.as_slice() {
        [first, second, image_id, ..] if [*first, *second] == SUCCESS_TOKENS => {
            BuildOutcome::Built {
                image_id: image_id.to_string(),
            }
        }
        _ => BuildOutcome::Failed {
            raw_log: last_text.to_string(),
        },
    }
}

/// Build an image from `image` with `inputs` copied into `workdir`.
///
/// Returns the new image id; a build without a success marker becomes
/// [`BoxcallError::BuildError`].
pub fn create_provisioned_image(
    daemon: &dyn BuildDaemon,
    image: &str,
    workdir: &str,
    inputs: &JobInputs,
    pull: bool,
) -> Result<String> {
    let context = assemble_context(image, inputs, workdir)?;
    let data = archive(&context)?;

    match ImageBuilder::new(daemon).build(data, pull)? {
        BuildOutcome::Built { image_id } => {
            tracing::info!(image_id = %image_id, base = image, "Provisioned image");
            Ok(image_id)
        }
        BuildOutcome::Failed { raw_log } => Err(BoxcallError::BuildError(raw_log)),
    }
}
