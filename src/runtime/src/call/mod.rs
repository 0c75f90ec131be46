//! Remote function calls.
//!
//! The submitting side captures a [`Callable`] and its [`Arguments`] into a
//! packaged function, assembles the job inputs and hands them to a
//! [`Launcher`]. Inside the job, a worker binary built around a
//! [`Registry`] rehydrates and invokes the function and writes its outputs,
//! which a [`ResultRelay`] reads back.
//!
//! ```text
//! Callable + Arguments ──capture──► PackagedFunction ──assemble──► JobInputs
//!                                                                    │
//!        ResultRelay ◄── outputs ◄── worker (run_job) ◄── Launcher ◄─┘
//! ```

pub mod entrypoint;
pub mod job;
pub mod packager;
pub mod registry;
pub mod rehydrate;
pub mod relay;
pub mod worker;

pub use entrypoint::{assemble, BOOTSTRAP, WORKER_BINARY};
pub use job::{
    provision_call_image, Job, JobSpec, Launcher, RemoteCallJob, RemoteCallOptions,
    RemoteLauncher,
};
pub use packager::{capture, Arguments, Call, Callable};
pub use registry::{CallResult, FunctionHandler, Invocation, Registry, RemoteType};
pub use rehydrate::{bind_environment, rehydrate, Bindings, Outcome, Target, PANIC_EXCEPTION};
pub use relay::{JobOutputs, OutputDir, ResultRelay};
pub use worker::{run_job, worker_main, Disposition, SourceScope};
