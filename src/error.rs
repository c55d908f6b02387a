use std::path::PathBuf;
use thiserror::Error;

use crate::controller::ControllerError;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Template file does not exist: {path:?}")]
    TemplateNotFound { path: PathBuf },

    #[error("Failed to render {path:?}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    #[error("Failed to load page data for {page:?}: {source}")]
    Controller {
        page: PathBuf,
        #[source]
        source: ControllerError,
    },

    #[error("Failed to read directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template parameters must be a map, got {0}")]
    InvalidParams(String),

    #[error("Invalid page directory {0:?}: must be a relative path inside the pages tree")]
    InvalidPath(PathBuf),

    #[error("{} page(s) failed to render ({rendered} rendered)", .failures.len())]
    Incomplete {
        rendered: usize,
        failures: Vec<PageFailure>,
    },
}

/// A page that failed during a best-effort build.
#[derive(Debug)]
pub struct PageFailure {
    /// Page path relative to the pages root.
    pub page: PathBuf,
    pub error: SiteError,
}

impl SiteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SiteError::Io {
            path: path.into(),
            source,
        }
    }
}
