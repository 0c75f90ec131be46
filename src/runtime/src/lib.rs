//! Boxcall Runtime - remote calls in provisioned container images.
//!
//! This module provides the two halves of running a Rust function inside a
//! container: image provisioning against a build daemon ([`oci`]) and the
//! remote-call protocol itself ([`call`]).

pub mod call;
pub mod oci;

// Re-export common types
pub use call::{
    assemble, capture, provision_call_image, Arguments, Call, Callable, Invocation, Job, JobSpec,
    Launcher, Registry, RemoteCallJob, RemoteCallOptions, RemoteLauncher, RemoteType,
    ResultRelay,
};
pub use oci::{
    create_provisioned_image, BuildDaemon, BuildOutcome, DaemonEndpoint, DockerDaemon,
    ImageBuilder,
};

/// Boxcall Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
