//! Error types for the VirtualBox management layer.
//!
//! Failures reported by `VBoxManage` carry their kind only in human readable
//! text. Every substring that is recognised lives in [`CLASSIFIERS`]; changing
//! an entry there changes how callers observe a failure.

use std::fmt;

use thiserror::Error;

/// Errors raised by the defaulter, the reconciler and the tool wrapper.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more problems in a declaration, collected over a whole pass.
    #[error("invalid specification:\n{0}")]
    Validation(ValidationErrors),

    /// A reconciliation step failed.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The referenced host resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The referenced medium does not exist.
    #[error("disk not found: {0}")]
    DiskNotFound(String),

    /// The resource being created is already present.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The medium is already attached at the requested slot.
    #[error("already attached: {0}")]
    AlreadyAttached(String),

    /// `VBoxManage` failed with output that matches no known pattern.
    #[error("VBoxManage {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    /// The `VBoxManage` binary could not be located.
    #[error("unable to find VBoxManage command at {0}")]
    ToolNotFound(String),

    /// The `VBoxManage` process could not be spawned.
    #[error("failed to run VBoxManage: {0}")]
    Spawn(#[source] std::io::Error),

    /// `showvminfo` could not find the machine.
    #[error("VM {0} does not exist")]
    MachineNotFound(String),

    /// Tool output lacked a field that a record cannot do without.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// The machine was defined but is not observable yet.
    #[error("VM {0} is not discoverable yet")]
    NotConverged(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_disk_not_found(&self) -> bool {
        matches!(self, Error::DiskNotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_already_attached(&self) -> bool {
        matches!(self, Error::AlreadyAttached(_))
    }

    /// Validation errors, if this is a validation failure.
    pub fn validation(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Operation context, if this failure came out of a reconciliation step.
    pub fn operation(&self) -> Option<&OperationError> {
        match self {
            Error::Operation(o) => Some(o),
            _ => None,
        }
    }
}

/// A single failed step of a reconciliation, tagged with the declarative
/// element (`disk/2`, `nic/0`, `vm/cpu`, ...) and the attempted operation.
#[derive(Error, Debug)]
#[error("{path}: {op}: {source}")]
pub struct OperationError {
    path: String,
    op: &'static str,
    #[source]
    source: Box<Error>,
}

impl OperationError {
    pub fn new(path: impl Into<String>, op: &'static str, source: Error) -> Self {
        Self {
            path: path.into(),
            op,
            source: Box::new(source),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn op(&self) -> &str {
        self.op
    }

    /// The underlying failure.
    pub fn cause(&self) -> &Error {
        &self.source
    }
}

/// A problem with one element of a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Ordered collection of validation problems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Whether any problem was recorded against `path`.
    pub fn has_path(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// `Ok(())` when nothing was recorded, otherwise the whole set.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    DiskNotFound,
    AlreadyAttached,
    AlreadyExists,
    NotFound,
}

/// Recognised `VBoxManage` failure texts, checked in order.
const CLASSIFIERS: &[(&str, ErrorKind)] = &[
    ("VERR_FILE_NOT_FOUND", ErrorKind::DiskNotFound),
    ("already attached", ErrorKind::AlreadyAttached),
    ("already exists", ErrorKind::AlreadyExists),
    ("does not exist", ErrorKind::NotFound),
    ("could not be found", ErrorKind::NotFound),
];

/// Turn the output of a failed `VBoxManage` invocation into a typed error.
pub fn classify(args: &[String], stdout: &str, stderr: &str) -> Error {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let message = text.trim().to_string();

    for (pattern, kind) in CLASSIFIERS {
        if stderr.contains(pattern) || stdout.contains(pattern) {
            return match kind {
                ErrorKind::DiskNotFound => Error::DiskNotFound(message),
                ErrorKind::AlreadyAttached => Error::AlreadyAttached(message),
                ErrorKind::AlreadyExists => Error::AlreadyExists(message),
                ErrorKind::NotFound => Error::NotFound(message),
            };
        }
    }

    Error::Command {
        args: args.join(" "),
        stderr: message,
    }
}
