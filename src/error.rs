//! Error types for Hermit
//!
//! All modules use `HermitResult<T>` as their return type. Every error maps to
//! exactly one [`ErrorKind`], and every kind has a stable process exit code.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Hermit operations
pub type HermitResult<T> = Result<T, HermitError>;

/// Stable classification of failures. The discriminant is the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnexpectedError = 1,
    UsageError = 2,
    PathOutsideRoot = 3,
    InvalidInput = 4,
    PackageRejected = 5,
    NotAGitRepo = 6,
    UnexpectedFormat = 7,
    UnsupportedFeature = 8,
    ExecutableNotFound = 9,
    ChecksumVerificationFailed = 10,
    InvalidChecksum = 11,
    MissingChecksum = 12,
    LockfileNotFound = 13,
    InvalidLockfileFormat = 14,
    FetchError = 15,
    PackageManagerError = 16,
    GitError = 17,
    GitRemoteNotFound = 18,
    GitInvalidRevision = 19,
    LockfileOutOfSync = 20,
    UnsatisfiableArchitectureFilter = 21,
    UnsupportedLockfileVersion = 22,
}

impl ErrorKind {
    /// Process exit code for this kind
    pub fn exit_code(self) -> u8 {
        self as u8
    }

    /// Human-readable name, as printed in reports
    pub fn name(self) -> &'static str {
        match self {
            Self::UnexpectedError => "UnexpectedError",
            Self::UsageError => "UsageError",
            Self::PathOutsideRoot => "PathOutsideRoot",
            Self::InvalidInput => "InvalidInput",
            Self::PackageRejected => "PackageRejected",
            Self::NotAGitRepo => "NotAGitRepo",
            Self::UnexpectedFormat => "UnexpectedFormat",
            Self::UnsupportedFeature => "UnsupportedFeature",
            Self::ExecutableNotFound => "ExecutableNotFound",
            Self::ChecksumVerificationFailed => "ChecksumVerificationFailed",
            Self::InvalidChecksum => "InvalidChecksum",
            Self::MissingChecksum => "MissingChecksum",
            Self::LockfileNotFound => "LockfileNotFound",
            Self::InvalidLockfileFormat => "InvalidLockfileFormat",
            Self::FetchError => "FetchError",
            Self::PackageManagerError => "PackageManagerError",
            Self::GitError => "GitError",
            Self::GitRemoteNotFound => "GitRemoteNotFound",
            Self::GitInvalidRevision => "GitInvalidRevision",
            Self::LockfileOutOfSync => "LockfileOutOfSync",
            Self::UnsatisfiableArchitectureFilter => "UnsatisfiableArchitectureFilter",
            Self::UnsupportedLockfileVersion => "UnsupportedLockfileVersion",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final classification of a failed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: u8,
    pub kind: ErrorKind,
    pub message: String,
}

/// All errors that can occur in Hermit
#[derive(Error, Debug)]
pub enum HermitError {
    // Input errors
    #[error("{0}")]
    Usage(String),

    #[error("Path {path} is outside of the root {root}")]
    PathOutsideRoot { root: PathBuf, path: PathBuf },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("{reason}")]
    UnsupportedFeature {
        reason: String,
        solution: Option<String>,
    },

    // Package and lockfile errors
    #[error("{reason}")]
    PackageRejected { reason: String, solution: String },

    #[error("{reason}")]
    UnexpectedFormat {
        reason: String,
        solution: Option<String>,
    },

    #[error("Lockfile not found: {0}")]
    LockfileNotFound(PathBuf),

    #[error("Invalid lockfile format {path}: {reason}")]
    InvalidLockfileFormat { path: PathBuf, reason: String },

    #[error("Unsupported lockfile version {version} in {path}")]
    UnsupportedLockfileVersion { path: PathBuf, version: String },

    #[error("Lockfile {path} is out of sync: {reason}")]
    LockfileOutOfSync { path: PathBuf, reason: String },

    #[error("{0}")]
    UnsatisfiableArchitectureFilter(String),

    #[error("{reason}")]
    PackageManager {
        reason: String,
        solution: Option<String>,
    },

    // Integrity errors
    #[error("Failed to verify {subject} against the provided checksums: {detail}")]
    ChecksumVerificationFailed { subject: String, detail: String },

    #[error("Invalid checksum '{value}': {reason}")]
    InvalidChecksum { value: String, reason: String },

    #[error("Missing checksum for {subject}")]
    MissingChecksum { subject: String },

    // Network and VCS errors
    #[error("Failed to fetch {url}: {reason}")]
    Fetch {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("Not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("Git command failed: {command}: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Git remote not found: {0}")]
    GitRemoteNotFound(String),

    #[error("Invalid git revision: {0}")]
    GitInvalidRevision(String),

    #[error("Required executable not found: {name}")]
    ExecutableNotFound { name: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HermitError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error.
    ///
    /// A missing executable is reported as [`HermitError::ExecutableNotFound`].
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        let command = command.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            return Self::ExecutableNotFound { name };
        }
        Self::CommandFailed { command, source }
    }

    /// Create a retryable fetch error
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Create an unsupported feature error without a custom solution
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            reason: reason.into(),
            solution: None,
        }
    }

    /// Create an unexpected format error without a custom solution
    pub fn unexpected_format(reason: impl Into<String>) -> Self {
        Self::UnexpectedFormat {
            reason: reason.into(),
            solution: None,
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::UsageError,
            Self::PathOutsideRoot { .. } => ErrorKind::PathOutsideRoot,
            Self::InvalidInput(_) | Self::ConfigInvalid { .. } => ErrorKind::InvalidInput,
            Self::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Self::PackageRejected { .. } => ErrorKind::PackageRejected,
            Self::UnexpectedFormat { .. } => ErrorKind::UnexpectedFormat,
            Self::LockfileNotFound(_) => ErrorKind::LockfileNotFound,
            Self::InvalidLockfileFormat { .. } => ErrorKind::InvalidLockfileFormat,
            Self::UnsupportedLockfileVersion { .. } => ErrorKind::UnsupportedLockfileVersion,
            Self::LockfileOutOfSync { .. } => ErrorKind::LockfileOutOfSync,
            Self::UnsatisfiableArchitectureFilter(_) => ErrorKind::UnsatisfiableArchitectureFilter,
            Self::PackageManager { .. } => ErrorKind::PackageManagerError,
            Self::ChecksumVerificationFailed { .. } => ErrorKind::ChecksumVerificationFailed,
            Self::InvalidChecksum { .. } => ErrorKind::InvalidChecksum,
            Self::MissingChecksum { .. } => ErrorKind::MissingChecksum,
            Self::Fetch { .. } => ErrorKind::FetchError,
            Self::NotAGitRepo(_) => ErrorKind::NotAGitRepo,
            Self::Git { .. } => ErrorKind::GitError,
            Self::GitRemoteNotFound(_) => ErrorKind::GitRemoteNotFound,
            Self::GitInvalidRevision(_) => ErrorKind::GitInvalidRevision,
            Self::ExecutableNotFound { .. } => ErrorKind::ExecutableNotFound,
            Self::Io { .. }
            | Self::CommandFailed { .. }
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_)
            | Self::Cancelled
            | Self::Internal(_) => ErrorKind::UnexpectedError,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Final outcome of a run that failed with this error
    pub fn outcome(&self) -> ExitOutcome {
        ExitOutcome {
            code: self.exit_code(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { retryable: true, .. })
    }

    /// Structural failures invalidate a whole request rather than one artifact
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UsageError
                | ErrorKind::PathOutsideRoot
                | ErrorKind::InvalidInput
                | ErrorKind::NotAGitRepo
                | ErrorKind::UnexpectedFormat
                | ErrorKind::UnsupportedFeature
                | ErrorKind::ExecutableNotFound
                | ErrorKind::LockfileNotFound
                | ErrorKind::InvalidLockfileFormat
                | ErrorKind::LockfileOutOfSync
                | ErrorKind::UnsupportedLockfileVersion
        )
    }

    /// Suggested way out of the error, if one is known
    pub fn solution(&self) -> Option<String> {
        match self {
            Self::UnsupportedFeature { solution, .. } => Some(solution.clone().unwrap_or_else(
                || "If you need this feature, please open an issue describing your use case.".to_string(),
            )),
            Self::PackageRejected { solution, .. } => Some(solution.clone()),
            Self::UnexpectedFormat { solution, .. } => solution.clone(),
            Self::PackageManager { solution, .. } => Some(solution.clone().unwrap_or_else(|| {
                "Please check that the lockfile is up to date and consistent with the manifest.\n\
                 If the problem persists, it may be a bug in the package manager handling."
                    .to_string()
            })),
            Self::Fetch { .. } => Some(
                "The error might be intermittent, please try again.\n\
                 If the issue seems to be on the server side, check the upstream service status."
                    .to_string(),
            ),
            Self::PathOutsideRoot { .. } => Some(
                "Make sure every path in the request and lockfiles stays inside the source directory."
                    .to_string(),
            ),
            Self::ChecksumVerificationFailed { .. } => Some(
                "The downloaded content does not match the lockfile. \
                 Do not retry blindly: the lockfile or the upstream artifact may have been tampered with."
                    .to_string(),
            ),
            Self::MissingChecksum { .. } => Some(
                "Add a checksum to the lockfile or run with --mode permissive to accept unverified artifacts."
                    .to_string(),
            ),
            Self::LockfileNotFound(_) => Some(
                "Make sure the lockfile exists at the requested path and is committed to the repository."
                    .to_string(),
            ),
            Self::ExecutableNotFound { name } => Some(format!(
                "Install {} and make sure it is on PATH.",
                name
            )),
            _ => None,
        }
    }

    /// The error message followed by its indented solution
    pub fn friendly_message(&self) -> String {
        let mut message = format!("{}: {}", self.kind(), self);
        if let Some(solution) = self.solution() {
            for line in solution.lines() {
                message.push_str("\n  ");
                message.push_str(line);
            }
        }
        message
    }
}
