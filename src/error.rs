use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::ops::InferShapesError;

/// Exception categories that user-visible inference failures map onto.
///
/// These are also the exception types that a constant `raise` can produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    TypeError,
    ValueError,
    AttributeError,
    NameError,
    KeyError,
    IndexError,
    AssertionError,
    RuntimeError,
    NotImplementedError,
    ZeroDivisionError,
    StopIteration,
    OverflowError,
    MemoryError,
    IndentationError,
    ImportError,
    UnboundLocalError,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 16] = [
        ExceptionKind::TypeError,
        ExceptionKind::ValueError,
        ExceptionKind::AttributeError,
        ExceptionKind::NameError,
        ExceptionKind::KeyError,
        ExceptionKind::IndexError,
        ExceptionKind::AssertionError,
        ExceptionKind::RuntimeError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::ZeroDivisionError,
        ExceptionKind::StopIteration,
        ExceptionKind::OverflowError,
        ExceptionKind::MemoryError,
        ExceptionKind::IndentationError,
        ExceptionKind::ImportError,
        ExceptionKind::UnboundLocalError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::IndentationError => "IndentationError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
        }
    }

    pub fn from_name(name: &str) -> Option<ExceptionKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type returned by a host bridge implementation.
pub type HostError = Box<dyn Error + Send + Sync>;

/// Errors that occur during abstract evaluation or dynamic re-inference.
#[derive(Debug)]
pub struct InferError(Box<InferErrorImpl>);

impl InferError {
    /// Return the general category of error.
    pub fn kind(&self) -> InferErrorKind {
        self.0.kind
    }

    /// The error message, without node context.
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Description of the innermost node being evaluated when the error
    /// occurred.
    pub fn node(&self) -> Option<&str> {
        self.0.node.as_deref()
    }

    /// Source expression of the node, if known.
    pub fn source_trace(&self) -> Option<&str> {
        self.0.trace.as_deref()
    }

    fn new(kind: InferErrorKind, message: impl Into<String>) -> Self {
        InferErrorImpl {
            kind,
            message: message.into(),
            node: None,
            trace: None,
            host: None,
        }
        .into()
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::Malformed, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::Internal, message)
    }

    pub(crate) fn user(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::User(kind), message)
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::user(ExceptionKind::TypeError, message)
    }

    pub(crate) fn value_error(message: impl Into<String>) -> Self {
        Self::user(ExceptionKind::ValueError, message)
    }

    pub(crate) fn attribute_error(message: impl Into<String>) -> Self {
        Self::user(ExceptionKind::AttributeError, message)
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::Runtime, message)
    }

    pub(crate) fn formula(prim_name: &str, error: InferShapesError) -> Self {
        Self::new(
            InferErrorKind::Formula,
            format!("For primitive '{}', {}", prim_name, error),
        )
    }

    /// Wrap an error raised by the host runtime. The host's message is kept
    /// as-is and the original error is available via [`Error::source`].
    pub(crate) fn host(error: HostError) -> Self {
        let message = error.to_string();
        InferErrorImpl {
            kind: InferErrorKind::Host,
            message,
            node: None,
            trace: None,
            host: Some(Arc::from(error)),
        }
        .into()
    }

    /// Attach the description of the node being evaluated. Only the first
    /// (innermost) node is kept.
    pub(crate) fn at_node(mut self, node: impl FnOnce() -> (String, Option<String>)) -> Self {
        if self.0.node.is_none() {
            let (desc, trace) = node();
            self.0.node = Some(desc);
            self.0.trace = trace;
        }
        self
    }
}

impl Display for InferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Error for InferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0
            .host
            .as_ref()
            .map(|err| &**err as &(dyn Error + 'static))
    }
}

impl From<InferErrorImpl> for InferError {
    fn from(inner: InferErrorImpl) -> Self {
        Self(Box::new(inner))
    }
}

/// The category of inference error. See [`InferError::kind`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum InferErrorKind {
    /// A call had the wrong number or kind of operands for its primitive.
    Malformed,
    /// An engine invariant was violated.
    Internal,
    /// A user-facing exception, such as a TypeError or an exception raised by
    /// a constant `raise` statement.
    User(ExceptionKind),
    /// A compiled inference formula rejected its inputs.
    Formula,
    /// The host runtime reported an error.
    Host,
    /// Re-inference at execution time failed.
    Runtime,
}

/// Internal implementation of [`InferError`].
#[derive(Debug)]
pub(crate) struct InferErrorImpl {
    kind: InferErrorKind,
    message: String,
    node: Option<String>,
    trace: Option<String>,
    host: Option<Arc<dyn Error + Send + Sync>>,
}

impl Display for InferErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            InferErrorKind::User(kind) => write!(f, "{}: {}", kind, self.message)?,
            _ => write!(f, "{}", self.message)?,
        }
        if let Some(node) = &self.node {
            write!(f, "\nThe node: {}", node)?;
        }
        if let Some(trace) = &self.trace {
            write!(f, "\n{}", trace)?;
        }
        Ok(())
    }
}
