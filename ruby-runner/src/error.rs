use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the build layout baked into the runner binary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// The slot still carries its placeholder marker.
    #[error("this is a template ruby-runner; {field} has not been finalized")]
    NotFinalized { field: &'static str },

    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// PATH_SEP must be a single ASCII byte.
    #[error("invalid path separator {value:?}: expected a single ASCII character")]
    InvalidPathSep { value: String },

    #[error("invalid value {value:?} for {field}: expected 0 or 1")]
    InvalidFlag { field: &'static str, value: String },
}

/// Fatal errors of a launch. Every variant ends the process with
/// [`LaunchError::EXIT_STATUS`].
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("fake file not found: {}", path.display())]
    BootstrapMissing { path: PathBuf },

    #[error("cannot insert fake.rb path due to too many arguments ({argc})")]
    TooManyArguments { argc: usize },

    #[error("cannot allocate memory for {what}")]
    OutOfMemory { what: &'static str },

    /// The final process-replace call returned.
    #[error("{}: {source}", program.display())]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl LaunchError {
    pub const EXIT_STATUS: i32 = -1;
}
