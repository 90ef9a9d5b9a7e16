//! Error types for the kumo core library.
//!
//! Every fallible operation returns [`Result`]. Errors carry a stable
//! [`ErrorCode`] plus an optional context chain held in a bounded
//! thread-local buffer. Context is prepended as an error crosses
//! abstraction boundaries, so the outermost annotation reads first.

use std::{cell::RefCell, fmt, io::ErrorKind, panic::Location, sync::Arc, thread, thread::ThreadId};

use thiserror::Error as ThisError;

/// Upper bound on the bytes of context a single thread retains.
///
/// Older (inner) context is truncated first when the chain outgrows the
/// buffer.
const CONTEXT_CAPACITY: usize = 512;

/// Stable error taxonomy shared by every kumo subsystem.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, ThisError)]
#[non_exhaustive]
pub enum ErrorCode {
    /// A caller-supplied argument was malformed or out of range.
    #[error("invalid argument")]
    InvalidArgument,
    /// The requested operation exists but has no implementation yet.
    #[error("not implemented")]
    NotImplemented,
    /// A requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// The columnar storage layer reported a failure.
    #[error("arrow error")]
    ArrowError,
    /// JSON input could not be parsed.
    #[error("could not parse json")]
    JsonParseFailed,
    /// A value could not be serialized to JSON.
    #[error("could not dump json")]
    JsonDumpFailed,
    /// An HTTP collaborator reported a failure.
    #[error("http operation failed")]
    HttpError,
    /// A property with the requested name is not attached to the graph.
    #[error("no such property")]
    PropertyNotFound,
    /// An entity with the same name is already bound.
    #[error("already exists")]
    AlreadyExists,
    /// A column's element type does not match the requested view.
    #[error("type error")]
    TypeError,
    /// A validation predicate rejected produced output.
    #[error("assertion failed")]
    AssertionFailed,
    /// Attaching or detaching a property failed.
    #[error("graph update failed")]
    GraphUpdateFailed,
}

impl ErrorCode {
    /// Returns the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::NotFound => "NOT_FOUND",
            Self::ArrowError => "ARROW_ERROR",
            Self::JsonParseFailed => "JSON_PARSE_FAILED",
            Self::JsonDumpFailed => "JSON_DUMP_FAILED",
            Self::HttpError => "HTTP_ERROR",
            Self::PropertyNotFound => "PROPERTY_NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::TypeError => "TYPE_ERROR",
            Self::AssertionFailed => "ASSERTION_FAILED",
            Self::GraphUpdateFailed => "GRAPH_UPDATE_FAILED",
        }
    }

    /// Maps this code onto the general condition callers compare against.
    ///
    /// Mirrors the two-level code/condition hierarchy of `std::io`: many
    /// specific codes collapse into one portable kind.
    #[must_use]
    pub const fn general_condition(self) -> ErrorKind {
        match self {
            Self::InvalidArgument
            | Self::ArrowError
            | Self::JsonParseFailed
            | Self::JsonDumpFailed
            | Self::TypeError
            | Self::AssertionFailed
            | Self::GraphUpdateFailed => ErrorKind::InvalidInput,
            Self::AlreadyExists => ErrorKind::AlreadyExists,
            Self::NotImplemented => ErrorKind::Unsupported,
            Self::NotFound | Self::PropertyNotFound => ErrorKind::NotFound,
            Self::HttpError => ErrorKind::Other,
        }
    }
}

struct ContextSlot {
    text: String,
    generation: u64,
}

thread_local! {
    static CONTEXT: RefCell<ContextSlot> = RefCell::new(ContextSlot {
        text: String::new(),
        generation: 0,
    });
}

/// Fat handle into the thread-local context buffer.
///
/// The handle pins the owning thread, the buffer generation and the chain
/// length at the time of the last update. Any mismatch means the error was
/// moved across threads or a second error claimed the buffer; the check is
/// best-effort and degrades to the bare code message.
#[derive(Clone, Copy, Debug)]
struct ContextHandle {
    thread: ThreadId,
    generation: u64,
    len: usize,
}

impl ContextHandle {
    fn is_current(&self) -> bool {
        if self.thread != thread::current().id() {
            return false;
        }
        CONTEXT.with(|slot| {
            let slot = slot.borrow();
            slot.generation == self.generation && slot.text.len() == self.len
        })
    }
}

#[derive(Clone, Debug, Default)]
enum Context {
    #[default]
    None,
    Local(ContextHandle),
    Owned(Arc<str>),
}

/// An error code plus an optional context chain.
///
/// `Error` is cheap to construct and to move within a thread. Moving an
/// error with live local context to another thread invalidates the context
/// (detected in debug builds); the error code itself always survives. Use
/// [`CopyableError`] to carry a snapshot across threads, e.g. out of a
/// parallel region.
#[derive(Clone, Debug)]
pub struct Error {
    code: ErrorCode,
    context: Context,
}

impl Error {
    /// Wraps a bare code with no context.
    #[must_use]
    pub const fn new(code: ErrorCode) -> Self {
        Self {
            code,
            context: Context::None,
        }
    }

    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Prepends `message` and the caller's source location to the context
    /// chain.
    ///
    /// The chain lives in a bounded thread-local buffer; when the chain
    /// outgrows it, the oldest (innermost) context is dropped.
    #[track_caller]
    #[must_use]
    pub fn with_context(self, message: impl fmt::Display) -> Self {
        let location = Location::caller();
        let annotated = format!("{message} ({}:{})", location.file(), location.line());
        self.prepend(&annotated)
    }

    fn prepend(mut self, message: &str) -> Self {
        let handle = CONTEXT.with(|slot| {
            let mut slot = slot.borrow_mut();
            match &self.context {
                Context::Local(handle) if handle.is_current() => {
                    let mut text = String::with_capacity(message.len() + 2 + slot.text.len());
                    text.push_str(message);
                    text.push_str(": ");
                    text.push_str(&slot.text);
                    slot.text = truncate_to_capacity(text);
                }
                Context::Owned(owned) => {
                    slot.generation += 1;
                    slot.text = truncate_to_capacity(format!("{message}: {owned}"));
                }
                _ => {
                    // Claim the buffer for this error. Any stale handle held
                    // by another Error on this thread becomes invalid.
                    slot.generation += 1;
                    slot.text = truncate_to_capacity(message.into());
                }
            }
            ContextHandle {
                thread: thread::current().id(),
                generation: slot.generation,
                len: slot.text.len(),
            }
        });
        self.context = Context::Local(handle);
        self
    }

    fn context_message(&self) -> Option<String> {
        match &self.context {
            Context::None => None,
            Context::Owned(owned) => Some(owned.to_string()),
            Context::Local(handle) => {
                if handle.is_current() {
                    Some(CONTEXT.with(|slot| slot.borrow().text.clone()))
                } else {
                    #[cfg(debug_assertions)]
                    tracing::warn!(
                        code = self.code.as_str(),
                        "error context does not match its thread-local buffer; \
                         an Error or Result probably crossed threads"
                    );
                    None
                }
            }
        }
    }
}

fn truncate_to_capacity(mut text: String) -> String {
    if text.len() > CONTEXT_CAPACITY {
        let mut cut = CONTEXT_CAPACITY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context_message() {
            Some(message) => f.write_str(&message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    /// Two errors compare equal when their codes match; context is advisory.
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl PartialEq<ErrorCode> for Error {
    fn eq(&self, other: &ErrorCode) -> bool {
        self.code == *other
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(error: arrow_schema::ArrowError) -> Self {
        Self::new(ErrorCode::ArrowError).prepend(&error.to_string())
    }
}

/// A self-contained snapshot of an [`Error`] safe to move between threads.
///
/// Workers inside parallel regions convert failures into `CopyableError`
/// before handing them to a [`crate::CombinedError`] reducer.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyableError {
    code: ErrorCode,
    message: String,
}

impl CopyableError {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<&Error> for CopyableError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code,
            message: error.to_string(),
        }
    }
}

impl From<Error> for CopyableError {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}

impl From<CopyableError> for Error {
    fn from(snapshot: CopyableError) -> Self {
        Self {
            code: snapshot.code,
            context: Context::Owned(Arc::from(snapshot.message.as_str())),
        }
    }
}

impl fmt::Display for CopyableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_code_displays_default_message() {
        let err = Error::new(ErrorCode::PropertyNotFound);
        assert_eq!(err.to_string(), "no such property");
        assert_eq!(err.code().as_str(), "PROPERTY_NOT_FOUND");
    }

    #[test]
    fn context_prepends_outermost_first() {
        let err = Error::new(ErrorCode::TypeError)
            .with_context("inner")
            .with_context("outer");
        let rendered = err.to_string();
        let outer = rendered.find("outer").expect("outer context present");
        let inner = rendered.find("inner").expect("inner context present");
        assert!(outer < inner, "outer context must lead: {rendered}");
    }

    #[test]
    fn context_records_source_location() {
        let err = Error::new(ErrorCode::InvalidArgument).with_context("bad delta");
        assert!(err.to_string().contains("error.rs"), "{err}");
    }

    #[test]
    fn crossing_threads_preserves_code_and_drops_context() {
        let err = Error::new(ErrorCode::AssertionFailed).with_context("from worker");
        let rendered = thread::spawn(move || err.to_string())
            .join()
            .expect("thread join");
        assert_eq!(rendered, "assertion failed");
    }

    #[test]
    fn copyable_snapshot_survives_threads() {
        let err = Error::new(ErrorCode::AssertionFailed).with_context("from worker");
        let snapshot = CopyableError::from(&err);
        let rendered = thread::spawn(move || Error::from(snapshot).to_string())
            .join()
            .expect("thread join");
        assert!(rendered.contains("from worker"), "{rendered}");
    }

    #[test]
    fn second_error_claims_the_buffer() {
        let first = Error::new(ErrorCode::NotFound).with_context("first");
        let second = Error::new(ErrorCode::TypeError).with_context("second");
        assert!(second.to_string().contains("second"));
        // The first error's handle is stale; it falls back to its code.
        assert_eq!(first.to_string(), "not found");
    }

    #[test]
    fn long_chains_are_bounded() {
        let mut err = Error::new(ErrorCode::InvalidArgument);
        for i in 0..64 {
            err = err.with_context(format!("layer {i} with a reasonably long annotation"));
        }
        assert!(err.to_string().len() <= CONTEXT_CAPACITY);
    }

    #[test]
    fn general_conditions_group_codes() {
        assert_eq!(
            ErrorCode::PropertyNotFound.general_condition(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ErrorCode::AlreadyExists.general_condition(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ErrorCode::TypeError.general_condition(),
            ErrorKind::InvalidInput
        );
    }
}
