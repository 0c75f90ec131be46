//! Remote exception envelope.
//!
//! A failure raised by a remote call travels back as two artifacts: the
//! exception itself (type name, message, optional structured payload) and a
//! plain-text traceback. The relay rebuilds the frame list from the text.

use std::panic::Location;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header line of a rendered traceback.
pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

const FRAME_PREFIX: &str = "  at ";

/// A single stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    /// Frame for a source location captured with `#[track_caller]`.
    pub fn from_location(location: &Location<'_>, function: impl Into<String>) -> Self {
        Self::new(location.file(), location.line(), function)
    }

    /// Parse a frame rendered by the `Display` impl.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(FRAME_PREFIX)?.strip_suffix(')')?;
        let (function, location) = rest.rsplit_once(" (")?;
        let (file, line) = location.rsplit_once(':')?;
        Some(Self::new(file, line.parse().ok()?, function))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{} ({}:{})", FRAME_PREFIX, self.function, self.file, self.line)
    }
}

/// Structured description of an error raised by a remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    /// Name of the error type as known to both sides
    pub type_name: String,
    pub message: String,
    /// Serialized error value, for callers that want the typed error back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Stack frames, most recent last. Carried in the traceback artifact.
    #[serde(skip)]
    pub frames: Vec<Frame>,
}

impl RemoteException {
    /// Create an exception whose innermost frame is the caller's location.
    #[track_caller]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            payload: None,
            frames: vec![Frame::from_location(Location::caller(), "<remote>")],
        }
    }

    /// Wrap a Rust error, using its type name as the exception type.
    #[track_caller]
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }

    /// Name the function of the innermost frame.
    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        if let Some(frame) = self.frames.last_mut() {
            frame.function = function.into();
        }
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Add a frame outside all existing ones (frames are innermost last).
    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.insert(0, frame);
    }

    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    /// Decode the structured payload into a concrete error type.
    pub fn downcast<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }

    /// Render the traceback artifact text.
    pub fn render_traceback(&self) -> String {
        let mut out = String::from(TRACEBACK_HEADER);
        out.push('\n');
        for frame in &self.frames {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out.push_str(&format!("{}: {}\n", self.type_name, self.message));
        out
    }
}

/// Rebuild the frame list from traceback text.
///
/// Frames are the contiguous `  at ...` lines following the header; the
/// trailing message is not scanned so multi-line messages can't inject
/// frames.
pub fn parse_traceback(text: &str) -> Vec<Frame> {
    text.lines()
        .skip_while(|l| l.trim_end() != TRACEBACK_HEADER)
        .skip(1)
        .map_while(Frame::parse)
        .collect()
}

fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
