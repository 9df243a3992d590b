use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use zip::result::ZipError;

/// Machine readable codes for the failures the backup engine reports.
///
/// Filesystem failures keep the `IO/<kind>` code produced by the
/// `From<std::io::Error>` conversion, see [`AppError::is_io`].
pub mod codes {
    /// The live database or the named archive does not exist.
    pub const NOT_FOUND: &str = "BACKUP/NOT_FOUND";
    /// The archive could not be read or its payload is missing or damaged.
    pub const CORRUPT_ARCHIVE: &str = "BACKUP/CORRUPT_ARCHIVE";
    /// A filename supplied by the caller is not a plain file name.
    pub const INVALID_NAME: &str = "BACKUP/INVALID_NAME";
    /// An archive with the same name is already present in the store.
    pub const ALREADY_EXISTS: &str = "BACKUP/ALREADY_EXISTS";
    /// Import archives cannot be built from the live database.
    pub const INVALID_KIND: &str = "BACKUP/INVALID_KIND";
    pub const LOW_DISK: &str = "BACKUP/LOW_DISK";
    pub const CANCELLED: &str = "BACKUP/CANCELLED";
    pub const ZIP: &str = "BACKUP/ZIP";
    pub const TASK: &str = "BACKUP/TASK";
    pub const ALREADY_RUNNING: &str = "SCHEDULER/ALREADY_RUNNING";
    pub const NOT_RUNNING: &str = "SCHEDULER/NOT_RUNNING";
    /// The automatic backup period must be longer than zero.
    pub const INVALID_INTERVAL: &str = "SCHEDULER/INVALID_INTERVAL";
}

/// A structured application error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::new(codes::NOT_FOUND, message)
    }

    pub fn corrupt_archive(message: impl Into<String>) -> Self {
        AppError::new(codes::CORRUPT_ARCHIVE, message)
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// True for errors that originate from a filesystem operation.
    pub fn is_io(&self) -> bool {
        self.code.starts_with("IO/")
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<ZipError> for AppError {
    fn from(error: ZipError) -> Self {
        match error {
            ZipError::Io(err) => AppError::from(err).with_context("source", "zip"),
            ZipError::InvalidArchive(reason) | ZipError::UnsupportedArchive(reason) => {
                AppError::corrupt_archive("The backup file is not a readable archive.")
                    .with_context("reason", reason)
            }
            ZipError::FileNotFound => {
                AppError::corrupt_archive("The backup archive is missing an expected entry.")
            }
            #[allow(unreachable_patterns)]
            other => AppError::new(codes::ZIP, other.to_string()),
        }
    }
}
