//! Reading the outcome of a remote call back on the submitting side.
//!
//! All accessors are lazy and cached: the output listing and every
//! artifact are read at most once. A remote exception is surfaced as
//! [`BoxcallError::RemoteException`] carrying the remote frames and the
//! local call site.
//!
//! # Exception state
//!
//! ```text
//! NotChecked ──load──▶ Absent
//!      │
//!      ├──────load──▶ Violation
//!      │
//!      └──────load──▶ Present { raised: false } ──raise──▶ Present { raised: true }
//! ```
//!
//! A job must write exactly one of the return value and the exception;
//! anything else is a [`BoxcallError::ProtocolViolation`] from every
//! accessor. [`ResultRelay::reraise_if_present`] raises at most once
//! unless forced.
//! Value accessors always raise when an exception is present, since there
//! is no value to return.

use std::fs;
use std::panic::Location;
use std::path::{Path, PathBuf};

use boxcall_core::artifacts::{EXCEPTION, RECEIVER_STATE, RETURN_VALUE, TRACEBACK_TEXT};
use boxcall_core::error::{BoxcallError, RaisedException, Result};
use boxcall_core::exception::{parse_traceback, Frame, RemoteException};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outputs of a job, as seen by the relay.
pub trait JobOutputs {
    /// Whether the job has finished and its outputs can be listed.
    fn is_complete(&self) -> bool;

    /// Names of all output artifacts.
    fn output_names(&self) -> Result<Vec<String>>;

    /// Content of one output artifact.
    fn read_output(&self, name: &str) -> Result<Vec<u8>>;
}

impl<T: JobOutputs + ?Sized> JobOutputs for Box<T> {
    fn is_complete(&self) -> bool {
        (**self).is_complete()
    }

    fn output_names(&self) -> Result<Vec<String>> {
        (**self).output_names()
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>> {
        (**self).read_output(name)
    }
}

/// Outputs left in a local directory.
#[derive(Debug, Clone)]
pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobOutputs for OutputDir {
    fn is_complete(&self) -> bool {
        self.path.is_dir()
    }

    fn output_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path.join(name))?)
    }
}

#[derive(Debug)]
enum ExceptionState {
    NotChecked,
    Absent,
    /// The job wrote both outcomes or neither.
    Violation(String),
    Present {
        decoded: std::result::Result<RemoteException, String>,
        traceback: String,
        raised: bool,
    },
}

/// Lazy, caching view of a remote call's outputs.
#[derive(Debug)]
pub struct ResultRelay<O> {
    outputs: O,
    bound_method: bool,
    names: Option<Vec<String>>,
    return_value: Option<Value>,
    updated_receiver: Option<Value>,
    exception: ExceptionState,
}

impl<O: JobOutputs> ResultRelay<O> {
    pub fn new(outputs: O, bound_method: bool) -> Self {
        Self {
            outputs,
            bound_method,
            names: None,
            return_value: None,
            updated_receiver: None,
            exception: ExceptionState::NotChecked,
        }
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut O {
        &mut self.outputs
    }

    pub fn is_bound_method(&self) -> bool {
        self.bound_method
    }

    /// The function's return value.
    ///
    /// Raises the remote exception if there is one.
    #[track_caller]
    pub fn return_value(&mut self) -> Result<&Value> {
        let value = match self.return_value.take() {
            Some(value) => value,
            None => self.load_value(RETURN_VALUE)?,
        };
        Ok(&*self.return_value.insert(value))
    }

    /// The return value decoded into `T`.
    #[track_caller]
    pub fn return_value_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.return_value()?.clone();
        Ok(serde_json::from_value(value)?)
    }

    /// State of the receiver after a bound-method call.
    #[track_caller]
    pub fn updated_receiver(&mut self) -> Result<&Value> {
        if !self.bound_method {
            return Err(BoxcallError::InvalidArgument(
                "updated receiver requested for a call that is not a bound method".to_string(),
            ));
        }
        let value = match self.updated_receiver.take() {
            Some(value) => value,
            None => self.load_value(RECEIVER_STATE)?,
        };
        Ok(&*self.updated_receiver.insert(value))
    }

    /// The remote exception, if the call raised.
    pub fn exception(&mut self) -> Result<Option<&RemoteException>> {
        self.load_exception()?;
        match &self.exception {
            ExceptionState::Violation(reason) => {
                Err(BoxcallError::ProtocolViolation(reason.clone()))
            }
            ExceptionState::Present {
                decoded: Ok(exception),
                ..
            } => Ok(Some(exception)),
            ExceptionState::Present {
                decoded: Err(reason),
                traceback,
                ..
            } => Err(BoxcallError::UndecodableException {
                reason: reason.clone(),
                traceback: traceback.clone(),
            }),
            _ => Ok(None),
        }
    }

    /// Raise the remote exception if there is one and it hasn't been raised
    /// yet; `force` raises it again regardless.
    #[track_caller]
    pub fn reraise_if_present(&mut self, force: bool) -> Result<()> {
        self.load_exception()?;
        if let ExceptionState::Violation(reason) = &self.exception {
            return Err(BoxcallError::ProtocolViolation(reason.clone()));
        }
        let should_raise = matches!(
            self.exception,
            ExceptionState::Present { raised, .. } if force || !raised
        );
        if should_raise {
            return Err(self.raise());
        }
        Ok(())
    }

    #[track_caller]
    fn load_value(&mut self, name: &str) -> Result<Value> {
        self.load_exception()?;
        if let ExceptionState::Violation(reason) = &self.exception {
            return Err(BoxcallError::ProtocolViolation(reason.clone()));
        }
        if matches!(self.exception, ExceptionState::Present { .. }) {
            return Err(self.raise());
        }
        if !self.has_output(name)? {
            return Err(BoxcallError::ProtocolViolation(format!(
                "job returned normally without writing {}",
                name
            )));
        }

        let bytes = self.outputs.read_output(name)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            BoxcallError::SerializationError(format!("cannot decode {}: {}", name, e))
        })
    }

    fn load_exception(&mut self) -> Result<()> {
        if !matches!(self.exception, ExceptionState::NotChecked) {
            return Ok(());
        }
        self.ensure_complete()?;

        let has_value = self.has_output(RETURN_VALUE)?;
        let has_exception = self.has_output(EXCEPTION)?;
        let violation = match (has_value, has_exception) {
            (true, false) => {
                self.exception = ExceptionState::Absent;
                return Ok(());
            }
            (false, true) => None,
            (true, true) => Some(format!("job wrote both {} and {}", RETURN_VALUE, EXCEPTION)),
            (false, false) => Some(format!(
                "job wrote neither {} nor {}",
                RETURN_VALUE, EXCEPTION
            )),
        };
        if let Some(reason) = violation {
            tracing::warn!(reason = %reason, "Remote call outputs break the result protocol");
            self.exception = ExceptionState::Violation(reason);
            return Ok(());
        }

        let traceback = if self.has_output(TRACEBACK_TEXT)? {
            String::from_utf8_lossy(&self.outputs.read_output(TRACEBACK_TEXT)?).into_owned()
        } else {
            String::new()
        };
        let decoded = serde_json::from_slice::<RemoteException>(&self.outputs.read_output(EXCEPTION)?)
            .map(|mut exception| {
                exception.frames = parse_traceback(&traceback);
                exception
            })
            .map_err(|e| e.to_string());

        if let Err(reason) = &decoded {
            tracing::warn!(reason = %reason, "Remote exception artifact could not be decoded");
        }
        self.exception = ExceptionState::Present {
            decoded,
            traceback,
            raised: false,
        };
        Ok(())
    }

    /// Build the error for a present exception and mark it raised.
    #[track_caller]
    fn raise(&mut self) -> BoxcallError {
        let call_site = Frame::from_location(Location::caller(), "<local>");
        match &mut self.exception {
            ExceptionState::Present {
                decoded,
                traceback,
                raised,
            } => {
                *raised = true;
                match decoded {
                    Ok(exception) => BoxcallError::RemoteException(Box::new(RaisedException {
                        exception: exception.clone(),
                        traceback: traceback.clone(),
                        call_site,
                    })),
                    Err(reason) => BoxcallError::UndecodableException {
                        reason: reason.clone(),
                        traceback: traceback.clone(),
                    },
                }
            }
            _ => BoxcallError::Other("no remote exception to raise".to_string()),
        }
    }

    fn ensure_complete(&self) -> Result<()> {
        if self.outputs.is_complete() {
            Ok(())
        } else {
            Err(BoxcallError::JobNotComplete(
                "outputs requested before the job finished".to_string(),
            ))
        }
    }

    fn has_output(&mut self, name: &str) -> Result<bool> {
        if self.names.is_none() {
            self.names = Some(self.outputs.output_names()?);
        }
        Ok(self
            .names
            .as_ref()
            .map_or(false, |names| names.iter().any(|n| n == name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use serde_json::json;

    /// In-memory outputs that count every listing and read.
    #[derive(Default)]
    struct FakeOutputs {
        files: BTreeMap<String, Vec<u8>>,
        pending: bool,
        listings: Cell<usize>,
        reads: RefCell<Vec<String>>,
    }

    impl FakeOutputs {
        fn with(files: &[(&str, &[u8])]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(n, c)| (n.to_string(), c.to_vec()))
                    .collect(),
                ..Default::default()
            }
        }

        fn raising(type_name: &str, message: &str) -> Self {
            let exception = RemoteException::new(type_name, message);
            let traceback = exception.render_traceback();
            let artifact = serde_json::to_vec(&exception).unwrap();
            Self::with(&[
                (EXCEPTION, artifact.as_slice()),
                (TRACEBACK_TEXT, traceback.as_bytes()),
            ])
        }
    }

    impl JobOutputs for FakeOutputs {
        fn is_complete(&self) -> bool {
            !self.pending
        }

        fn output_names(&self) -> Result<Vec<String>> {
            self.listings.set(self.listings.get() + 1);
            Ok(self.files.keys().cloned().collect())
        }

        fn read_output(&self, name: &str) -> Result<Vec<u8>> {
            self.reads.borrow_mut().push(name.to_string());
            self.files
                .get(name)
                .cloned()
                .ok_or_else(|| BoxcallError::MissingArtifact(name.to_string()))
        }
    }

    fn remote(err: BoxcallError) -> RaisedException {
        match err {
            BoxcallError::RemoteException(raised) => *raised,
            other => panic!("expected a remote exception, got {other}"),
        }
    }

    #[test]
    fn test_return_value_is_read_once() {
        let mut relay = ResultRelay::new(FakeOutputs::with(&[(RETURN_VALUE, b"[1,2]")]), false);
        assert_eq!(relay.return_value().unwrap(), &json!([1, 2]));
        assert_eq!(relay.return_value_as::<Vec<u8>>().unwrap(), vec![1, 2]);
        assert!(relay.exception().unwrap().is_none());
        relay.reraise_if_present(false).unwrap();

        assert_eq!(relay.outputs().listings.get(), 1);
        assert_eq!(*relay.outputs().reads.borrow(), vec![RETURN_VALUE.to_string()]);
    }

    #[test]
    fn test_updated_receiver() {
        let mut relay = ResultRelay::new(
            FakeOutputs::with(&[(RETURN_VALUE, b"null"), (RECEIVER_STATE, b"{\"n\":3}")]),
            true,
        );
        assert_eq!(relay.updated_receiver().unwrap(), &json!({"n": 3}));
        assert_eq!(relay.return_value().unwrap(), &Value::Null);

        let mut unbound = ResultRelay::new(FakeOutputs::with(&[(RETURN_VALUE, b"1")]), false);
        assert!(matches!(
            unbound.updated_receiver(),
            Err(BoxcallError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_receiver_state_is_protocol_violation() {
        let mut relay = ResultRelay::new(FakeOutputs::with(&[(RETURN_VALUE, b"1")]), true);
        assert!(matches!(
            relay.updated_receiver(),
            Err(BoxcallError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_reraise_at_most_once_unless_forced() {
        let mut relay = ResultRelay::new(FakeOutputs::raising("KeyError", "'alpha'"), false);

        let raised = remote(relay.reraise_if_present(false).unwrap_err());
        assert_eq!(raised.exception.type_name, "KeyError");
        relay.reraise_if_present(false).unwrap();
        assert!(relay.reraise_if_present(true).is_err());
        relay.reraise_if_present(false).unwrap();

        assert_eq!(relay.outputs().listings.get(), 1);
        assert_eq!(relay.outputs().reads.borrow().len(), 2);
    }

    #[test]
    fn test_value_access_always_raises() {
        let mut relay = ResultRelay::new(FakeOutputs::raising("ValueError", "bad"), false);
        assert!(relay.return_value().is_err());
        assert!(relay.return_value().is_err());
        // The value accessor already raised it.
        relay.reraise_if_present(false).unwrap();
    }

    #[test]
    fn test_raised_exception_carries_remote_and_local_frames() {
        let mut relay = ResultRelay::new(FakeOutputs::raising("ValueError", "bad"), false);
        let line = line!() + 1;
        let raised = remote(relay.return_value().unwrap_err());

        let frames = raised.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "<remote>");
        assert_eq!(raised.call_site.line, line);
        assert!(raised.call_site.file.ends_with("relay.rs"));
        assert!(raised.to_string().starts_with("ValueError: bad\n"));
    }

    #[test]
    fn test_both_or_neither_is_protocol_violation() {
        let mut both = FakeOutputs::raising("ValueError", "bad");
        both.files.insert(RETURN_VALUE.to_string(), b"1".to_vec());
        let mut relay = ResultRelay::new(both, false);
        assert!(matches!(
            relay.return_value(),
            Err(BoxcallError::ProtocolViolation(_))
        ));
        assert!(matches!(
            relay.exception(),
            Err(BoxcallError::ProtocolViolation(_))
        ));
        assert!(matches!(
            relay.reraise_if_present(false),
            Err(BoxcallError::ProtocolViolation(_))
        ));
        assert!(matches!(
            relay.reraise_if_present(false),
            Err(BoxcallError::ProtocolViolation(_))
        ));
        assert_eq!(relay.outputs().listings.get(), 1);
        assert!(relay.outputs().reads.borrow().is_empty());

        let mut relay = ResultRelay::new(FakeOutputs::with(&[("stdout.log", b"")]), false);
        assert!(matches!(
            relay.return_value(),
            Err(BoxcallError::ProtocolViolation(_))
        ));
        assert!(matches!(
            relay.exception(),
            Err(BoxcallError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_both_outcomes_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exception = RemoteException::new("ValueError", "bad");
        fs::write(dir.path().join(EXCEPTION), serde_json::to_vec(&exception).unwrap()).unwrap();
        fs::write(dir.path().join(TRACEBACK_TEXT), exception.render_traceback()).unwrap();
        fs::write(dir.path().join(RETURN_VALUE), b"1").unwrap();

        let mut relay = ResultRelay::new(OutputDir::new(dir.path()), false);
        match relay.exception() {
            Err(BoxcallError::ProtocolViolation(reason)) => assert!(reason.contains("both")),
            other => panic!("expected a protocol violation, got {other:?}"),
        }
        assert!(matches!(
            relay.reraise_if_present(true),
            Err(BoxcallError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_undecodable_exception_keeps_traceback() {
        let outputs = FakeOutputs::with(&[
            (EXCEPTION, b"\x80\x04garbage"),
            (TRACEBACK_TEXT, b"Traceback (most recent call last):\nOSError: disk\n"),
        ]);
        let mut relay = ResultRelay::new(outputs, false);
        match relay.reraise_if_present(false).unwrap_err() {
            BoxcallError::UndecodableException { traceback, .. } => {
                assert!(traceback.contains("OSError: disk"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            relay.exception(),
            Err(BoxcallError::UndecodableException { .. })
        ));
    }

    #[test]
    fn test_incomplete_job() {
        let mut outputs = FakeOutputs::with(&[(RETURN_VALUE, b"1")]);
        outputs.pending = true;
        let mut relay = ResultRelay::new(outputs, false);
        assert!(matches!(
            relay.return_value(),
            Err(BoxcallError::JobNotComplete(_))
        ));
        assert!(matches!(
            relay.reraise_if_present(false),
            Err(BoxcallError::JobNotComplete(_))
        ));

        relay.outputs_mut().pending = false;
        assert_eq!(relay.return_value().unwrap(), &json!(1));
    }

    #[test]
    fn test_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RETURN_VALUE), b"\"done\"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let outputs = OutputDir::new(dir.path());
        assert!(outputs.is_complete());
        assert_eq!(outputs.output_names().unwrap(), vec![RETURN_VALUE.to_string()]);

        let mut relay = ResultRelay::new(outputs, false);
        assert_eq!(relay.return_value().unwrap(), &json!("done"));

        assert!(!OutputDir::new(dir.path().join("missing")).is_complete());
    }
}
