//! Error types for function deployment.

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::DeployedFunction;

/// Result alias used throughout the crate.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while deploying functions.
///
/// Transport failures are passed through untouched so callers can tell a
/// network problem apart from a status the platform returned.
#[derive(Debug, Error)]
pub enum DeployError {
    // ─────────────────────────────────────────────────────────────────────────
    // Input errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Slug does not match the platform's function name grammar.
    #[error("Invalid Function name. Must start with at least one letter, and only include alphanumeric characters, underscores, and hyphens. ({pattern})")]
    InvalidSlug {
        /// The rejected slug.
        slug: String,
        /// Accepted grammar.
        pattern: &'static str,
    },

    /// An explicitly requested import map is absent.
    #[error("import map not found: {}: {source}", path.display())]
    ImportMapNotFound {
        /// Path that was looked up.
        path: PathBuf,
        /// Underlying not-found error.
        #[source]
        source: std::io::Error,
    },

    /// Nothing to deploy.
    #[error("No Functions specified or found in supabase/functions")]
    NoFunctions,

    /// supabase/config.toml is not valid TOML for the expected schema.
    #[error("failed to parse {}: {source}", path.display())]
    Config {
        /// Path of the config file.
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Neither a flag nor a linked project supplied a project ref.
    #[error("Cannot find project ref. Have you run supabase link?")]
    MissingProjectRef,

    /// No access token could be found.
    #[error("Access token not provided. Supply an access token by running supabase login or setting the SUPABASE_ACCESS_TOKEN environment variable.")]
    MissingAccessToken,

    // ─────────────────────────────────────────────────────────────────────────
    // Toolchain errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Release download returned a non-success status.
    #[error("failed to download {url}: {status}")]
    ToolchainDownload {
        /// Release asset URL.
        url: String,
        /// Status returned by the release host.
        status: reqwest::StatusCode,
    },

    /// Release archive could not be read.
    #[error("failed to extract toolchain archive: {0}")]
    ToolchainArchive(String),

    /// Bundler exited with a non-zero status.
    #[error("Error bundling function: exit status {code}\n{stderr}")]
    Bundle {
        /// Process exit code (-1 if terminated by a signal).
        code: i32,
        /// Captured stderr, newline terminated.
        stderr: String,
    },

    /// Bundler could not be started.
    #[error("Error bundling function: {0}")]
    BundlerSpawn(#[source] std::io::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Remote errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Network failure on any HTTP call.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Existence check returned neither 200 nor 404.
    #[error("Unexpected error deploying Function: {body}")]
    UnexpectedStatus {
        /// Response status.
        status: reqwest::StatusCode,
        /// Raw response body.
        body: String,
    },

    /// Create call returned a non-success status.
    #[error("Failed to create a new Function on the Supabase project: {body}")]
    CreateFailed {
        /// Response status.
        status: reqwest::StatusCode,
        /// Raw response body.
        body: String,
    },

    /// Update call returned a non-success status.
    #[error("Failed to update an existing Function's body on the Supabase project: {body}")]
    UpdateFailed {
        /// Response status.
        status: reqwest::StatusCode,
        /// Raw response body.
        body: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Runtime errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A function in a batch failed. Functions listed in `deployed` were
    /// deployed before it and are left in place.
    #[error("{source}")]
    Batch {
        /// Slug of the function that failed.
        slug: String,
        /// Functions deployed earlier in the batch, in order.
        deployed: Vec<DeployedFunction>,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// The underlying error, with batch attribution stripped.
    #[must_use]
    pub fn cause(&self) -> &DeployError {
        match self {
            Self::Batch { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Slug of the batch member that failed, if this came from a batch.
    #[must_use]
    pub fn failed_slug(&self) -> Option<&str> {
        match self {
            Self::Batch { slug, .. } => Some(slug.as_str()),
            _ => None,
        }
    }

    /// Functions a failed batch deployed before stopping.
    #[must_use]
    pub fn deployed_before_failure(&self) -> &[DeployedFunction] {
        match self {
            Self::Batch { deployed, .. } => deployed.as_slice(),
            _ => &[],
        }
    }

    /// Whether this error was caused by a failing network call.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self.cause(), Self::Transport(_))
    }

    /// Whether this error wraps a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self.cause() {
            Self::ImportMapNotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<zip::result::ZipError> for DeployError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::ToolchainArchive(e.to_string())
    }
}
