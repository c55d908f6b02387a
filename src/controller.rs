//! Per-page data ("controllers").
//!
//! A page `blog/post.html.j2` may have data at `<controllers>/blog/post.json`
//! (or `.yaml` / `.yml`). Missing data is normal; unreadable or malformed data
//! is an error.

use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type PageData = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to parse YAML in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Page data in {path:?} must be a map, got {kind}")]
    NotAMap { path: PathBuf, kind: &'static str },
}

/// Supplies page-specific template data.
pub trait PageDataSource {
    /// Returns the data for the page `logical_name` in `subdir`, or `None` when the page has none.
    fn load_page_data(
        &self,
        subdir: &Path,
        logical_name: &str,
    ) -> Result<Option<PageData>, ControllerError>;
}

/// Reads page data files from a controllers directory tree.
pub struct FsControllers {
    root: PathBuf,
}

/// Data file extensions, in lookup order.
const DATA_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

impl FsControllers {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn parse(path: &Path, content: &str) -> Result<PageData, ControllerError> {
        let value: Value = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(content).map_err(|source| ControllerError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).map_err(|source| ControllerError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(ControllerError::NotAMap {
                path: path.to_path_buf(),
                kind: kind_name(&other),
            }),
        }
    }
}

impl PageDataSource for FsControllers {
    fn load_page_data(
        &self,
        subdir: &Path,
        logical_name: &str,
    ) -> Result<Option<PageData>, ControllerError> {
        let dir = self.root.join(subdir);
        for ext in DATA_EXTENSIONS {
            let path = dir.join(format!("{}.{}", logical_name, ext));
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(ControllerError::Io { path, source }),
            };
            debug!("Loading page data from {:?}", path);
            return Self::parse(&path, &content).map(Some);
        }
        Ok(None)
    }
}

/// Page data held in memory, keyed by `subdir/logical_name`.
#[derive(Default)]
pub struct StaticPageData {
    pages: HashMap<PathBuf, PageData>,
}

impl StaticPageData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(
        mut self,
        subdir: impl AsRef<Path>,
        logical_name: &str,
        data: PageData,
    ) -> Self {
        self.pages.insert(subdir.as_ref().join(logical_name), data);
        self
    }
}

impl PageDataSource for StaticPageData {
    fn load_page_data(
        &self,
        subdir: &Path,
        logical_name: &str,
    ) -> Result<Option<PageData>, ControllerError> {
        Ok(self.pages.get(&subdir.join(logical_name)).cloned())
    }
}

/// No page has data.
pub struct NoPageData;

impl PageDataSource for NoPageData {
    fn load_page_data(&self, _: &Path, _: &str) -> Result<Option<PageData>, ControllerError> {
        Ok(None)
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
