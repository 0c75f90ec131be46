//! Artifact names of the remote-call protocol.
//!
//! These file names are shared by the packaging side, the remote worker
//! and the result relay, and must match exactly in both directions.

use std::collections::BTreeMap;

/// Shell command the job runs inside the provisioned image.
pub const ENTRYPOINT_COMMAND: &str = "sh run_job.sh";

/// Bootstrap script executed by [`ENTRYPOINT_COMMAND`].
pub const BOOTSTRAP_SCRIPT: &str = "run_job.sh";

/// Serialized [`PackagedFunction`](crate::PackagedFunction).
pub const FUNCTION_ARTIFACT: &str = "function.json";

/// Source text (definitions or a `use` line) for the remote side.
pub const SOURCE_TEXT: &str = "source.txt";

/// Return value, written iff the call completed normally.
pub const RETURN_VALUE: &str = "_function_return.json";

/// Receiver state after a bound-method call completed normally.
pub const RECEIVER_STATE: &str = "_object_state.json";

/// Serialized [`RemoteException`](crate::RemoteException), written iff the call raised.
pub const EXCEPTION: &str = "exception.json";

/// Rendered traceback accompanying [`EXCEPTION`].
pub const TRACEBACK_TEXT: &str = "traceback.txt";

/// File name → content handed to the job abstraction.
pub type JobInputs = BTreeMap<String, Vec<u8>>;
