//! Error types for idlrun.
//!
//! Domain errors use thiserror; the binary converts them to anyhow at the
//! top level.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::render::units::UnitError;
use crate::savefile::SaveFileError;

/// Which external installation could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installation {
    /// The IDL interpreter itself
    Idl,
    /// The SolarSoft package tree
    Ssw,
}

impl std::fmt::Display for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Installation::Idl => f.write_str("IDL"),
            Installation::Ssw => f.write_str("SSW"),
        }
    }
}

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    /// A required installation path was neither given nor configured
    #[error("{field} must be set at construction or in the idlrunrc file")]
    Configuration { field: &'static str },

    /// Script argument is neither literal text nor an existing file
    #[error("Input script must either be a string or path to a script: {0}")]
    InvalidInput(String),

    /// `to_unit` received a value without compatible unit metadata
    #[error(transparent)]
    UnitMismatch(UnitError),

    /// Template rendering failed (undefined variable, filter failure, syntax)
    #[error("Template rendering failed: {0}")]
    Render(#[source] tera::Error),

    /// The interpreter reported a halted execution
    #[error("IDL execution halted:\n{stderr}")]
    ScriptRuntime { stderr: String },

    /// The interpreter could not check out a license
    #[error("IDL could not acquire a license:\n{stderr}")]
    License { stderr: String },

    /// Executable or package tree missing
    #[error("No {system} installation found at {}", .path.display())]
    InstallationNotFound { system: Installation, path: PathBuf },

    /// Reading the SAVE file failed
    #[error(transparent)]
    SaveFile(#[from] SaveFileError),

    /// Filesystem or process spawning errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<tera::Error> for Error {
    fn from(err: tera::Error) -> Self {
        // Filter failures arrive wrapped by tera; surface unit errors as such.
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(cause) = source {
            if let Some(unit_err) = cause.downcast_ref::<UnitError>() {
                return Error::UnitMismatch(unit_err.clone());
            }
            source = cause.source();
        }
        Error::Render(err)
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;
