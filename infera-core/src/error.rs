#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ErrorKind {
    /// Unexpected error
    Unexpected,

    /// raised on any IO error, like reading or flushing a kv storage file
    IOError,

    /// raised when a tensor or a registered entry is looked up but absent
    NotFound,

    /// raised when a runtime configuration can not be honored on this platform,
    /// like an affinity policy without a known cpu topology
    ConfigError,

    /// raised when an operator has no implementation for the requested device
    /// and data type
    Unsupported,

    /// raised when allocating device memory or spawning device threads fails
    ResourceError,

    /// raised when a gpu program fails to build or a cached binary is corrupted
    ProgramBuildError,

    /// raised on manipulating tensors in a recoverable way, like a dtype mismatch on
    /// reading the data out
    TensorError,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(cause) = self.cause.as_ref() {
            write!(f, "\ncaused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl<S: Into<String>> From<(ErrorKind, S)> for Error {
    fn from((kind, message): (ErrorKind, S)) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::IOError,
            message: err.to_string(),
            cause: Some(Box::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks a structural precondition of the graph, like the rank of an operator's
/// input. A violation means the graph was built wrong upstream, so the offending
/// value is logged and the current thread panics instead of returning an error.
#[macro_export]
macro_rules! precondition {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            let message = format!($($arg)+);
            $crate::__tracing::error!(
                condition = stringify!($cond),
                "structural precondition failed: {}",
                message
            );
            panic!("structural precondition failed: {}", message);
        }
    };
}
