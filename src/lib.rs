//! Renders a tree of page templates into a static site.
//!
//! Each page `templates/pages/<dir>/<name>.html.j2` is rendered with
//! minijinja into `docs/<dir>/<name>.html`. A page sees, in increasing
//! precedence, the injected `pagename` value, the site-wide and caller
//! parameters, and its own data from `controllers/<dir>/<name>.json`
//! (or `.yaml`).
//!
//! Templates can compose fragments with the `wrap` filter and the
//! `include` function, and use the `math` and `json` helpers.
//!
//! ```no_run
//! use pagesmith::{SiteBuilder, SiteConfig};
//! use std::path::Path;
//!
//! let builder = SiteBuilder::from_config(Path::new("my-site"), &SiteConfig::default());
//! builder
//!     .build_site(&serde_json::json!({"title": "My Site"}), Path::new(""))
//!     .unwrap();
//! ```

pub mod builder;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod filters;
pub mod helpers;
pub mod page;

pub use builder::{BuildReport, SiteBuilder};
pub use config::{ConfigError, SiteConfig, SiteRoot};
pub use controller::{ControllerError, FsControllers, NoPageData, PageDataSource, StaticPageData};
pub use engine::TemplateEngine;
pub use error::{PageFailure, SiteError};
pub use helpers::Fragments;
pub use page::PageName;
