//! Submitting remote calls to a job launcher.
//!
//! Running a job (scheduling it somewhere, waiting for it, collecting its
//! output files) is the business of a [`Launcher`]. This module only
//! prepares the job: fixed entrypoint command, working directory and
//! inputs. The outcome is read back through a [`ResultRelay`].

use boxcall_core::artifacts::ENTRYPOINT_COMMAND;
use boxcall_core::config::BoxcallConfig;
use boxcall_core::error::Result;
use boxcall_core::exception::RemoteException;
use boxcall_core::JobInputs;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::entrypoint::assemble;
use super::packager::{Arguments, Call, Callable};
use super::relay::{JobOutputs, ResultRelay};
use crate::oci::build::{create_provisioned_image, BuildDaemon};

/// What a launcher is asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub image: String,
    pub command: String,
    /// Directory the inputs are placed in and the command runs from.
    pub workdir: String,
    pub inputs: JobInputs,
}

/// A launched job.
pub trait Job: JobOutputs {
    /// Block until the job has finished.
    fn wait(&mut self) -> Result<()>;

    fn stdout(&self) -> Result<String>;

    fn stderr(&self) -> Result<String>;
}

/// Something that can run jobs.
pub trait Launcher {
    fn launch(&self, spec: JobSpec) -> Result<Box<dyn Job>>;
}

/// Where and how remote calls run.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCallOptions {
    pub image: String,
    pub workdir: String,
    pub send_source: bool,
    /// Extra files shipped with every call. Remote-call files of the same
    /// name take precedence.
    pub extra_inputs: JobInputs,
}

impl RemoteCallOptions {
    pub fn new(image: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            workdir: workdir.into(),
            send_source: true,
            extra_inputs: JobInputs::new(),
        }
    }

    /// Options from configuration, running in `image`.
    pub fn from_config(config: &BoxcallConfig, image: impl Into<String>) -> Self {
        Self {
            send_source: config.send_source,
            ..Self::new(image, config.provision.workdir.clone())
        }
    }

    pub fn with_send_source(mut self, send_source: bool) -> Self {
        self.send_source = send_source;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.extra_inputs.insert(name.into(), content.into());
        self
    }

    /// The job spec for `call`.
    pub fn job_spec(&self, call: &Call) -> Result<JobSpec> {
        let mut inputs = self.extra_inputs.clone();
        inputs.extend(assemble(call, self.send_source)?);
        Ok(JobSpec {
            image: self.image.clone(),
            command: ENTRYPOINT_COMMAND.to_string(),
            workdir: self.workdir.clone(),
            inputs,
        })
    }
}

/// A remote call in flight.
pub struct RemoteCallJob {
    target: String,
    relay: ResultRelay<Box<dyn Job>>,
}

impl RemoteCallJob {
    /// Package `call` and launch it.
    pub fn submit(launcher: &dyn Launcher, call: &Call, options: &RemoteCallOptions) -> Result<Self> {
        let spec = options.job_spec(call)?;
        let target = call.callable.qualified_name();
        tracing::info!(target = %target, image = %spec.image, "Submitting remote call");

        let job = launcher.launch(spec)?;
        Ok(Self {
            target,
            relay: ResultRelay::new(job, call.callable.is_bound_method()),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn wait(&mut self) -> Result<()> {
        self.relay.outputs_mut().wait()
    }

    /// Wait, forward the job's output to the log and return the call's value.
    #[track_caller]
    pub fn finish(&mut self) -> Result<Value> {
        self.wait()?;
        let job = self.relay.outputs();
        for line in job.stdout()?.lines() {
            tracing::info!(target: "boxcall::remote", stream = "stdout", "{}", line);
        }
        for line in job.stderr()?.lines() {
            tracing::info!(target: "boxcall::remote", stream = "stderr", "{}", line);
        }
        self.relay.return_value().cloned()
    }

    /// [`finish`](Self::finish), decoding the value into `T`.
    #[track_caller]
    pub fn finish_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.finish()?;
        Ok(serde_json::from_value(value)?)
    }

    #[track_caller]
    pub fn return_value(&mut self) -> Result<&Value> {
        self.relay.return_value()
    }

    #[track_caller]
    pub fn updated_receiver(&mut self) -> Result<&Value> {
        self.relay.updated_receiver()
    }

    pub fn exception(&mut self) -> Result<Option<&RemoteException>> {
        self.relay.exception()
    }

    #[track_caller]
    pub fn reraise_if_present(&mut self, force: bool) -> Result<()> {
        self.relay.reraise_if_present(force)
    }
}

/// A launcher that runs calls instead of raw jobs.
pub struct RemoteLauncher<L> {
    launcher: L,
    options: RemoteCallOptions,
}

impl<L: Launcher> RemoteLauncher<L> {
    pub fn new(launcher: L, options: RemoteCallOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &RemoteCallOptions {
        &self.options
    }

    /// Submit `callable(arguments)`.
    pub fn call(&self, callable: Callable, arguments: Arguments) -> Result<RemoteCallJob> {
        RemoteCallJob::submit(&self.launcher, &Call::new(callable, arguments), &self.options)
    }

    /// Submit and wait for the value.
    #[track_caller]
    pub fn run(&self, callable: Callable, arguments: Arguments) -> Result<Value> {
        self.call(callable, arguments)?.finish()
    }
}

/// Build an image from `base_image` with the job inputs of `call` baked
/// into `workdir`.
pub fn provision_call_image(
    daemon: &dyn BuildDaemon,
    call: &Call,
    base_image: &str,
    workdir: &str,
    send_source: bool,
    pull: bool,
) -> Result<String> {
    let inputs = assemble(call, send_source)?;
    create_provisioned_image(daemon, base_image, workdir, &inputs, pull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::registry::{CallResult, Invocation, Registry, RemoteType};
    use crate::call::worker::run_job;
    use crate::oci::build::{BuildOptions, ProgressStream};
    use boxcall_core::artifacts::{BOOTSTRAP_SCRIPT, FUNCTION_ARTIFACT, SOURCE_TEXT};
    use boxcall_core::BoxcallError;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Queue {
        items: Vec<String>,
    }

    impl RemoteType for Queue {
        const TYPE_NAME: &'static str = "Queue";

        fn call_method(&mut self, method: &str, call: &Invocation<'_>) -> CallResult {
            match method {
                "push" => {
                    self.items.push(call.arg(0)?);
                    Ok(json!(self.items.len()))
                }
                _ => Err(RemoteException::new("AttributeError", method)),
            }
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_function("math", "add", |call| {
                Ok(json!(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
            })
            .register_function("math", "div", |call| {
                let (a, b): (i64, i64) = (call.arg(0)?, call.arg(1)?);
                a.checked_div(b)
                    .map(|q| json!(q))
                    .ok_or_else(|| RemoteException::new("ZeroDivisionError", "division by zero"))
            })
            .register_type::<Queue>();
        registry
    }

    /// Runs jobs in a temp directory with an in-process worker.
    struct LocalLauncher {
        registry: Registry,
        launched: RefCell<Vec<JobSpec>>,
    }

    struct LocalJob {
        dir: tempfile::TempDir,
        registry: Registry,
        done: bool,
    }

    impl JobOutputs for LocalJob {
        fn is_complete(&self) -> bool {
            self.done
        }

        fn output_names(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = fs::read_dir(self.dir.path())?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Ok(names)
        }

        fn read_output(&self, name: &str) -> Result<Vec<u8>> {
            Ok(fs::read(self.dir.path().join(name))?)
        }
    }

    impl Job for LocalJob {
        fn wait(&mut self) -> Result<()> {
            if !self.done {
                run_job(&self.registry, self.dir.path())?;
                self.done = true;
            }
            Ok(())
        }

        fn stdout(&self) -> Result<String> {
            Ok(String::new())
        }

        fn stderr(&self) -> Result<String> {
            Ok("worker finished\n".to_string())
        }
    }

    impl Launcher for LocalLauncher {
        fn launch(&self, spec: JobSpec) -> Result<Box<dyn Job>> {
            let dir = tempfile::tempdir()?;
            for (name, content) in &spec.inputs {
                fs::write(dir.path().join(name), content)?;
            }
            self.launched.borrow_mut().push(spec);
            Ok(Box::new(LocalJob {
                dir,
                registry: self.registry.clone(),
                done: false,
            }))
        }
    }

    fn launcher() -> LocalLauncher {
        LocalLauncher {
            registry: registry(),
            launched: RefCell::new(Vec::new()),
        }
    }

    fn options() -> RemoteCallOptions {
        RemoteCallOptions::new("worker:latest", "/opt/boxcall").with_send_source(false)
    }

    #[test]
    fn test_job_spec_uses_fixed_entrypoint() {
        let call = Call::new(Callable::function("math", "add"), Arguments::new());
        let spec = options().with_input("data.csv", "a,b\n").job_spec(&call).unwrap();

        assert_eq!(spec.command, "sh run_job.sh");
        assert_eq!(spec.image, "worker:latest");
        assert_eq!(spec.workdir, "/opt/boxcall");
        let names: Vec<&str> = spec.inputs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["data.csv", FUNCTION_ARTIFACT, BOOTSTRAP_SCRIPT, SOURCE_TEXT]);
    }

    #[test]
    fn test_call_files_override_extra_inputs() {
        let call = Call::new(Callable::function("math", "add"), Arguments::new());
        let spec = options()
            .with_input(BOOTSTRAP_SCRIPT, "echo hijacked")
            .job_spec(&call)
            .unwrap();
        assert_ne!(spec.inputs[BOOTSTRAP_SCRIPT], b"echo hijacked".to_vec());
    }

    #[test]
    fn test_from_config() {
        let mut config = BoxcallConfig::default();
        config.send_source = false;
        let options = RemoteCallOptions::from_config(&config, "img");
        assert_eq!(options.workdir, config.provision.workdir);
        assert!(!options.send_source);
    }

    #[test]
    fn test_remote_launcher_runs_function() {
        let remote = RemoteLauncher::new(launcher(), options());
        let value = remote
            .run(Callable::function("math", "add"), Arguments::new().arg(&2).arg(&3))
            .unwrap();
        assert_eq!(value, json!(5));
        assert_eq!(remote.launcher.launched.borrow().len(), 1);
    }

    #[test]
    fn test_remote_error_surfaces_once() {
        let remote = RemoteLauncher::new(launcher(), options());
        let mut job = remote
            .call(Callable::function("math", "div"), Arguments::new().arg(&1).arg(&0))
            .unwrap();

        match job.finish().unwrap_err() {
            BoxcallError::RemoteException(raised) => {
                assert_eq!(raised.exception.type_name, "ZeroDivisionError")
            }
            other => panic!("unexpected error: {other}"),
        }
        job.reraise_if_present(false).unwrap();
        assert!(job.exception().unwrap().unwrap().is("ZeroDivisionError"));
    }

    #[test]
    fn test_bound_method_returns_receiver_state() {
        let queue = Queue {
            items: vec!["a".to_string()],
        };
        let remote = RemoteLauncher::new(launcher(), options());
        let mut job = remote
            .call(Callable::method(&queue, "push"), Arguments::new().arg("b"))
            .unwrap();

        assert_eq!(job.finish_as::<usize>().unwrap(), 2);
        let state: Queue = serde_json::from_value(job.updated_receiver().unwrap().clone()).unwrap();
        assert_eq!(state.items, vec!["a", "b"]);
        assert_eq!(queue.items, vec!["a"]);
    }

    #[test]
    fn test_result_before_wait_is_not_complete() {
        let remote = RemoteLauncher::new(launcher(), options());
        let mut job = remote
            .call(Callable::function("math", "add"), Arguments::new().arg(&1).arg(&1))
            .unwrap();
        assert!(matches!(
            job.return_value(),
            Err(BoxcallError::JobNotComplete(_))
        ));
        job.wait().unwrap();
        assert_eq!(job.return_value().unwrap(), &json!(2));
    }

    struct RecordingDaemon {
        context: RefCell<Vec<u8>>,
    }

    impl BuildDaemon for RecordingDaemon {
        fn build(&self, context: Vec<u8>, _: &BuildOptions) -> Result<ProgressStream<'_>> {
            *self.context.borrow_mut() = context;
            let line = json!({ "stream": "Successfully built 5eed\n" }).to_string();
            Ok(Box::new(std::iter::once(Ok(line))))
        }
    }

    #[test]
    fn test_provision_call_image_bakes_job_inputs() {
        let daemon = RecordingDaemon {
            context: RefCell::new(Vec::new()),
        };
        let call = Call::new(Callable::function("math", "add"), Arguments::new().arg(&1));
        let image = provision_call_image(&daemon, &call, "debian:bookworm-slim", "/job", false, false)
            .unwrap();
        assert_eq!(image, "5eed");

        let context = daemon.context.borrow();
        let mut archive = tar::Archive::new(context.as_slice());
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths[0], "Dockerfile");
        assert!(paths.iter().any(|p| Path::new(p) == Path::new("inputs/function.json")));
    }
}
