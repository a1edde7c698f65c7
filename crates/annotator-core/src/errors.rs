//! Error types for the annotator core library.

use std::path::PathBuf;

/// Why a single read attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ReadFailure {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Top-level error enum for the annotator core library.
///
/// A document that does not exist is not an error: readers return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum AnnotatorError {
    #[error("Failed to read {} after {attempts} attempts: {source}", path.display())]
    ReadExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ReadFailure,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode document for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl AnnotatorError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnnotatorError::Write {
            path: path.into(),
            source,
        }
    }
}

#[cfg(feature = "python")]
impl From<AnnotatorError> for pyo3::PyErr {
    fn from(err: AnnotatorError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyValueError};

        match &err {
            AnnotatorError::ReadExhausted { .. } | AnnotatorError::Write { .. } => {
                PyIOError::new_err(err.to_string())
            }
            AnnotatorError::Encode { .. } => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type AnnotatorResult<T> = Result<T, AnnotatorError>;
