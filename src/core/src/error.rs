use thiserror::Error;

use crate::exception::{Frame, RemoteException};

/// Boxcall error types
#[derive(Error, Debug)]
pub enum BoxcallError {
    /// The function closes over variables of an enclosing function
    #[error("Can't launch a job with closure variables: {}", names.join(", "))]
    UnshippableClosure { names: Vec<String> },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Source text was requested but none is attached to the callable
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Malformed call (e.g. duplicate keyword argument)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The receiver's type is not registered in the remote environment
    #[error("Receiver type not available: {0}")]
    MissingReceiverType(String),

    /// No callable could be resolved for an unbound call
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// A captured module reference could not be imported
    #[error("Import error: {0}")]
    ImportError(String),

    /// Build daemon emitted a record this client cannot interpret
    #[error("Build daemon error: {0}")]
    DaemonError(String),

    /// Image build finished without a success marker
    #[error("Failed to build image: {0}")]
    BuildError(String),

    /// Remote side broke the output artifact contract
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Results were requested before the job finished
    #[error("Job not complete: {0}")]
    JobNotComplete(String),

    /// An output artifact expected by the protocol is missing
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// Exception raised by the remote call, re-raised locally
    #[error("{0}")]
    RemoteException(Box<RaisedException>),

    /// The exception artifact exists but could not be decoded
    #[error("Remote exception could not be decoded: {reason}")]
    UndecodableException { reason: String, traceback: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BoxcallError {
    fn from(err: serde_json::Error) -> Self {
        BoxcallError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BoxcallError {
    fn from(err: serde_yaml::Error) -> Self {
        BoxcallError::SerializationError(err.to_string())
    }
}

/// A remote exception surfaced at a local call site.
///
/// Holds the remote frames (reconstructed from the traceback artifact)
/// followed by the local frame that triggered the raise.
#[derive(Debug, Clone)]
pub struct RaisedException {
    pub exception: RemoteException,
    pub traceback: String,
    pub call_site: Frame,
}

impl RaisedException {
    /// Remote frames, most recent last, followed by the local call site.
    pub fn frames(&self) -> Vec<Frame> {
        let mut frames = self.exception.frames.clone();
        frames.push(self.call_site.clone());
        frames
    }
}

impl std::fmt::Display for RaisedException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}: {}", self.exception.type_name, self.exception.message)?;
        for frame in &self.exception.frames {
            writeln!(f, "{}", frame)?;
        }
        write!(f, "{} (local)", self.call_site)
    }
}

/// Result type alias for Boxcall operations
pub type Result<T> = std::result::Result<T, BoxcallError>;
