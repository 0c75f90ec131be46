//! Container image provisioning.
//!
//! Builds a minimal image for a job: a generated descriptor selects the base
//! image and copies the job inputs into a working directory.
//!
//! # Pipeline
//!
//! ```text
//! JobInputs ──► BuildContext ──► tar stream ──► BuildDaemon ──► progress log
//!              (Dockerfile +     (exact sizes,                   │
//!               inputs/...)       stable order)                  ▼
//!                                                    BuildOutcome::Built { image_id }
//!                                                    BuildOutcome::Failed { raw_log }
//! ```

pub mod build;
pub mod daemon;

pub use build::{
    archive, assemble_context, create_provisioned_image, BuildContext, BuildDaemon, BuildOptions,
    BuildOutcome, Dockerfile, ImageBuilder, Instruction,
};
pub use daemon::{docker_machine_env, DaemonEndpoint, DockerDaemon, TlsSettings};
