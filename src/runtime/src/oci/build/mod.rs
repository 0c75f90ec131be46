//! Image build support.
//!
//! Provides build context assembly, tar archiving, descriptor
//! rendering, and a build engine that drives a build daemon.
//!
//! # Supported Instructions
//!
//! FROM, RUN, COPY

pub mod archive;
pub mod context;
pub mod dockerfile;
pub mod engine;

pub use archive::archive;
pub use context::{assemble_context, BuildContext, DESCRIPTOR_PATH, INPUTS_DIR};
pub use dockerfile::{Dockerfile, Instruction};
pub use engine::{
    create_provisioned_image, BuildDaemon, BuildOptions, BuildOutcome, ImageBuilder,
    ProgressStream,
};
