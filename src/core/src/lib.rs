//! Boxcall Core - Foundational Types and Abstractions
//!
//! This module provides the types shared by the packaging side and the
//! remote worker: the packaged function artifact, the fixed artifact names
//! of the remote-call protocol, the remote exception envelope, errors and
//! configuration.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod exception;
pub mod packaged;

// Re-export commonly used types
pub use artifacts::JobInputs;
pub use config::{BoxcallConfig, DaemonConfig, LogLevel, ProvisionConfig};
pub use error::{BoxcallError, RaisedException, Result};
pub use exception::{Frame, RemoteException};
pub use packaged::{CallableRef, PackagedFunction};

/// Boxcall version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
