use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{SiteConfig, SiteRoot};
use crate::controller::{kind_name, FsControllers, PageDataSource};
use crate::engine::TemplateEngine;
use crate::error::{PageFailure, SiteError};
use crate::helpers::Fragments;
use crate::page::{parameter_bag, PageName};

/// Output paths written by a successful build, in render order.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub rendered: Vec<PathBuf>,
}

/// Renders the pages tree of one site into its output tree.
pub struct SiteBuilder {
    root: SiteRoot,
    engine: TemplateEngine,
    page_data: Box<dyn PageDataSource>,
    globals: Map<String, Value>,
    fail_fast: bool,
}

impl SiteBuilder {
    pub fn new(root: SiteRoot, engine: TemplateEngine, page_data: Box<dyn PageDataSource>) -> Self {
        Self {
            root,
            engine,
            page_data,
            globals: Map::new(),
            fail_fast: true,
        }
    }

    /// A builder for the site at `app_root`, reading page data from its controllers tree.
    pub fn from_config(app_root: &Path, config: &SiteConfig) -> Self {
        let root = SiteRoot::new(app_root, config);
        let engine = TemplateEngine::new(Fragments::new(&root))
            .with_strict_undefined(config.strict_undefined);
        let page_data = Box::new(FsControllers::new(root.controllers.clone()));
        Self::new(root, engine, page_data)
            .with_globals(config.globals.clone())
            .with_fail_fast(config.fail_fast)
    }

    /// Site-wide parameters, overridden by the parameters of each call.
    pub fn with_globals(mut self, globals: Map<String, Value>) -> Self {
        self.globals = globals;
        self
    }

    /// With `false`, `build_site` keeps going past failed pages and reports them all at the end.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn root(&self) -> &SiteRoot {
        &self.root
    }

    /// Renders the page `template_name` in `subdir` of the pages tree and
    /// returns the path of the written output file.
    ///
    /// Parameters are merged under the page's own data and over the
    /// injected `pagename` value. Output is written only once the whole
    /// page rendered.
    pub fn render<T: Serialize>(
        &self,
        subdir: &Path,
        template_name: &str,
        params: &T,
    ) -> Result<PathBuf, SiteError> {
        let params = self.merge_params(params)?;
        self.render_page(subdir, template_name, &params)
    }

    fn render_page(
        &self,
        subdir: &Path,
        template_name: &str,
        params: &Map<String, Value>,
    ) -> Result<PathBuf, SiteError> {
        check_subdir(subdir)?;
        let page = PageName::parse(template_name, &self.root.template_suffix);
        let out_rel = subdir.join(&page.out_file);
        info!("Rendering {}", out_rel.display());

        let page_data = self
            .page_data
            .load_page_data(subdir, &page.logical_name)
            .map_err(|source| SiteError::Controller {
                page: subdir.join(template_name),
                source,
            })?;
        if page_data.is_some() {
            info!("  - found controller for {}", out_rel.display());
        } else {
            info!("  - no controller for {}", out_rel.display());
        }

        let template_path = self.root.pages.join(subdir).join(template_name);
        let source = fs::read_to_string(&template_path).map_err(|e| {
            error!("Failed to read template file: {:?}", template_path);
            if e.kind() == std::io::ErrorKind::NotFound {
                SiteError::TemplateNotFound {
                    path: template_path.clone(),
                }
            } else {
                SiteError::io(&template_path, e)
            }
        })?;

        let bag = parameter_bag(&page, params, page_data);
        let template_id = subdir.join(template_name);
        let rendered = self
            .engine
            .render_str(&template_id.to_string_lossy(), &source, &bag)
            .map_err(|source| SiteError::Render {
                path: template_path.clone(),
                source,
            })?;

        let out_dir = self.root.output.join(subdir);
        Self::ensure_dir_exists(&out_dir)?;
        let out_path = out_dir.join(&page.out_file);
        write_atomic(&out_path, &rendered)?;
        info!("  - finished rendering {}", out_rel.display());
        Ok(out_path)
    }

    /// Renders every page under `subdir` of the pages tree, files first,
    /// then each subdirectory, all in name order.
    pub fn build_site<T: Serialize>(
        &self,
        params: &T,
        subdir: &Path,
    ) -> Result<BuildReport, SiteError> {
        let params = self.merge_params(params)?;
        check_subdir(subdir)?;
        let mut report = BuildReport::default();
        let mut failures = Vec::new();
        let mut ancestors = HashSet::new();
        self.build_dir(&params, subdir, &mut ancestors, &mut report, &mut failures)?;

        if failures.is_empty() {
            info!("Built {} page(s)", report.rendered.len());
            Ok(report)
        } else {
            Err(SiteError::Incomplete {
                rendered: report.rendered.len(),
                failures,
            })
        }
    }

    /// `ancestors` holds the canonical paths of the directories currently
    /// being built, so a symlink back into one of them is skipped while
    /// sibling aliases of the same directory are still built.
    fn build_dir(
        &self,
        params: &Map<String, Value>,
        subdir: &Path,
        ancestors: &mut HashSet<PathBuf>,
        report: &mut BuildReport,
        failures: &mut Vec<PageFailure>,
    ) -> Result<(), SiteError> {
        let pages_dir = self.root.pages.join(subdir);
        let canonical = fs::canonicalize(&pages_dir).map_err(|source| SiteError::ReadDir {
            path: pages_dir.clone(),
            source,
        })?;
        if !ancestors.insert(canonical.clone()) {
            warn!("Skipping {:?}: symlink cycle back into a parent directory", pages_dir);
            return Ok(());
        }
        let result =
            self.build_dir_entries(params, subdir, &pages_dir, ancestors, report, failures);
        ancestors.remove(&canonical);
        result
    }

    fn build_dir_entries(
        &self,
        params: &Map<String, Value>,
        subdir: &Path,
        pages_dir: &Path,
        ancestors: &mut HashSet<PathBuf>,
        report: &mut BuildReport,
        failures: &mut Vec<PageFailure>,
    ) -> Result<(), SiteError> {
        let (files, dirs) = self.list_dir(pages_dir)?;
        debug!(
            "{:?}: {} file(s), {} dir(s)",
            pages_dir,
            files.len(),
            dirs.len()
        );

        for file in files {
            match self.render_page(subdir, &file, params) {
                Ok(out_path) => report.rendered.push(out_path),
                Err(e) if self.fail_fast => return Err(e),
                Err(e) => {
                    error!("{}", e);
                    failures.push(PageFailure {
                        page: subdir.join(&file),
                        error: e,
                    });
                }
            }
        }

        for dir in dirs {
            let child = subdir.join(&dir);
            match self.build_dir(params, &child, ancestors, report, failures) {
                Ok(()) => {}
                Err(e) if self.fail_fast => return Err(e),
                Err(e) => {
                    error!("{}", e);
                    failures.push(PageFailure {
                        page: child,
                        error: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// Lists the file and directory names directly under `dir`, each sorted.
    fn list_dir(&self, dir: &Path) -> Result<(Vec<String>, Vec<String>), SiteError> {
        let read_dir_error = |source| SiteError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_dir_error)? {
            let entry = entry.map_err(read_dir_error)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 file name: {:?}", entry.path());
                continue;
            };
            // follows symlinks, so linked directories are traversed
            let metadata = fs::metadata(entry.path()).map_err(read_dir_error)?;
            if metadata.is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        files.sort();
        dirs.sort();
        Ok((files, dirs))
    }

    fn merge_params<T: Serialize>(&self, params: &T) -> Result<Map<String, Value>, SiteError> {
        let mut merged = self.globals.clone();
        merged.extend(to_param_map(params)?);
        Ok(merged)
    }

    /// Ensures that the specified directory exists, creating it if necessary.
    fn ensure_dir_exists(path: &Path) -> Result<(), SiteError> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                error!("Failed to create directory: {:?}", path);
                SiteError::io(path, e)
            })?;
        }
        Ok(())
    }
}

fn to_param_map<T: Serialize>(params: &T) -> Result<Map<String, Value>, SiteError> {
    let value =
        serde_json::to_value(params).map_err(|e| SiteError::InvalidParams(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(SiteError::InvalidParams(kind_name(&other).to_string())),
    }
}

fn check_subdir(subdir: &Path) -> Result<(), SiteError> {
    let ok = subdir
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(SiteError::InvalidPath(subdir.to_path_buf()))
    }
}

/// Writes `content` to a sibling temp file, then renames it over `path`.
fn write_atomic(path: &Path, content: &str) -> Result<(), SiteError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp_path, content).map_err(|e| {
        error!("Failed to write rendered content to file: {:?}", tmp_path);
        SiteError::io(&tmp_path, e)
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        error!("Failed to move {:?} to {:?}", tmp_path, path);
        let _ = fs::remove_file(&tmp_path);
        SiteError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::StaticPageData;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn test_config() -> SiteConfig {
        SiteConfig {
            wrappers_path: "components".into(),
            includes_path: "components".into(),
            pages_path: "page".into(),
            extension: "txt".to_string(),
            output_path: "output".into(),
            controller_path: "controller".into(),
            ..SiteConfig::default()
        }
    }

    /// The two-page site: `main-content` at the root, `sub-content` under `sub-path`.
    fn fixture_site() -> TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("page/main-content.txt.j2"),
            "{{ pagename.name }} - {{ variable }} - {{ controllerVar }}",
        );
        write(
            &root.join("page/sub-path/sub-content.txt.j2"),
            "{{ pagename.name }} - {{ variable }} - {{ controllerVar }}",
        );
        write(
            &root.join("controller/main-content.json"),
            r#"{"controllerVar": "Controller Var"}"#,
        );
        write(
            &root.join("controller/sub-path/sub-content.json"),
            r#"{"controllerVar": "Sub page Controller Var"}"#,
        );
        write(
            &root.join("components/wrapper.txt.j2"),
            "Start-{{ variable }}-{{ content }}-Finish",
        );
        write(
            &root.join("components/include.txt.j2"),
            "Included Text With {{ variable }}",
        );
        dir
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_render_to_file() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let out = builder
            .render(
                Path::new(""),
                "main-content.txt.j2",
                &json!({"variable": "Variable"}),
            )
            .unwrap();
        assert_eq!(out, site.path().join("output/main-content.txt"));
        assert_eq!(read(&out), "main-content - Variable - Controller Var");
    }

    #[test]
    fn test_render_creates_output_subdir() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        assert!(!site.path().join("output/sub-path").exists());
        builder
            .render(
                Path::new("sub-path"),
                "sub-content.txt.j2",
                &json!({"variable": "Variable"}),
            )
            .unwrap();
        assert_eq!(
            read(&site.path().join("output/sub-path/sub-content.txt")),
            "sub-content - Variable - Sub page Controller Var"
        );
    }

    #[test]
    fn test_render_is_idempotent() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let params = json!({"variable": "Variable"});
        let out = builder
            .render(Path::new(""), "main-content.txt.j2", &params)
            .unwrap();
        let first = fs::read(&out).unwrap();
        builder
            .render(Path::new(""), "main-content.txt.j2", &params)
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), first);
        // no temp file left behind
        let entries: Vec<_> = fs::read_dir(site.path().join("output"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("main-content.txt")]);
    }

    #[test]
    fn test_controller_overrides_params() {
        let site = fixture_site();
        write(&site.path().join("page/x.txt.j2"), "x={{ x }} y={{ y }}");
        write(&site.path().join("controller/x.json"), r#"{"x": 2}"#);
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let out = builder
            .render(Path::new(""), "x.txt.j2", &json!({"x": 1, "y": 1}))
            .unwrap();
        assert_eq!(read(&out), "x=2 y=1");
    }

    #[test]
    fn test_pagename_flags() {
        let site = fixture_site();
        let template = "{% if pagename.is.home %}home{% endif %}{% if pagename.is.about %}about{% endif %}";
        write(&site.path().join("page/home.txt.j2"), template);
        write(&site.path().join("page/about.txt.j2"), template);
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let home = builder
            .render(Path::new(""), "home.txt.j2", &json!({}))
            .unwrap();
        let about = builder
            .render(Path::new(""), "about.txt.j2", &json!({}))
            .unwrap();
        assert_eq!(read(&home), "home");
        assert_eq!(read(&about), "about");
    }

    #[test]
    fn test_render_with_wrap_and_include() {
        let site = fixture_site();
        write(
            &site.path().join("page/layout.txt.j2"),
            r#"{% filter wrap("wrapper") %}{{ include("include") }}{% endfilter %}"#,
        );
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let out = builder
            .render(Path::new(""), "layout.txt.j2", &json!({"variable": "V"}))
            .unwrap();
        assert_eq!(read(&out), "Start-V-Included Text With V-Finish");
    }

    #[test]
    fn test_render_missing_template() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder
            .render(Path::new(""), "nope.txt.j2", &json!({}))
            .unwrap_err();
        assert!(matches!(err, SiteError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_render_missing_wrapper_writes_nothing() {
        let site = fixture_site();
        write(
            &site.path().join("page/broken.txt.j2"),
            r#"{% filter wrap("missing") %}x{% endfilter %}"#,
        );
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder
            .render(Path::new(""), "broken.txt.j2", &json!({}))
            .unwrap_err();
        assert!(matches!(err, SiteError::Render { .. }));
        assert!(!site.path().join("output/broken.txt").exists());
    }

    #[test]
    fn test_render_malformed_controller_is_fatal() {
        let site = fixture_site();
        write(&site.path().join("controller/main-content.json"), "{oops");
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder
            .render(Path::new(""), "main-content.txt.j2", &json!({}))
            .unwrap_err();
        assert!(matches!(err, SiteError::Controller { .. }));
    }

    #[test]
    fn test_render_rejects_escaping_subdir() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder
            .render(Path::new("../elsewhere"), "main-content.txt.j2", &json!({}))
            .unwrap_err();
        assert!(matches!(err, SiteError::InvalidPath(_)));
    }

    #[test]
    fn test_render_rejects_non_map_params() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder
            .render(Path::new(""), "main-content.txt.j2", &json!([1, 2]))
            .unwrap_err();
        assert!(matches!(err, SiteError::InvalidParams(_)));
    }

    #[test]
    fn test_render_with_injected_page_data() {
        let site = fixture_site();
        let config = test_config();
        let root = SiteRoot::new(site.path(), &config);
        let engine = TemplateEngine::new(Fragments::new(&root));
        let data = json!({"controllerVar": "Injected"}).as_object().cloned().unwrap();
        let page_data = StaticPageData::new().with_page("", "main-content", data);
        let builder = SiteBuilder::new(root, engine, Box::new(page_data));
        let out = builder
            .render(Path::new(""), "main-content.txt.j2", &json!({"variable": "V"}))
            .unwrap();
        assert_eq!(read(&out), "main-content - V - Injected");
    }

    #[test]
    fn test_build_site_with_subdirs() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let params = HashMap::from([("variable", "Variable")]);
        let report = builder.build_site(&params, Path::new("")).unwrap();

        let output = site.path().join("output");
        assert_eq!(
            report.rendered,
            vec![
                output.join("main-content.txt"),
                output.join("sub-path/sub-content.txt"),
            ]
        );
        assert_eq!(
            read(&output.join("main-content.txt")),
            "main-content - Variable - Controller Var"
        );
        assert_eq!(
            read(&output.join("sub-path/sub-content.txt")),
            "sub-content - Variable - Sub page Controller Var"
        );
    }

    #[test]
    fn test_build_site_mirrors_tree() {
        let site = fixture_site();
        write(&site.path().join("page/a/b/c/deep.txt.j2"), "deep");
        write(&site.path().join("page/a/b.txt.j2"), "b");
        fs::create_dir_all(site.path().join("page/empty")).unwrap();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        builder.build_site(&json!({}), Path::new("")).unwrap();

        let output = site.path().join("output");
        assert_eq!(read(&output.join("a/b/c/deep.txt")), "deep");
        assert_eq!(read(&output.join("a/b.txt")), "b");
        assert!(!output.join("empty").exists());
    }

    #[test]
    fn test_build_site_order_files_before_dirs() {
        let site = fixture_site();
        write(&site.path().join("page/zz.txt.j2"), "zz");
        write(&site.path().join("page/aa/inner.txt.j2"), "inner");
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let report = builder.build_site(&json!({}), Path::new("")).unwrap();
        let output = site.path().join("output");
        assert_eq!(
            report.rendered,
            vec![
                output.join("main-content.txt"),
                output.join("zz.txt"),
                output.join("aa/inner.txt"),
                output.join("sub-path/sub-content.txt"),
            ]
        );
    }

    #[test]
    fn test_build_site_from_subdir() {
        let site = fixture_site();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let report = builder
            .build_site(&json!({"variable": "Variable"}), Path::new("sub-path"))
            .unwrap();
        assert_eq!(report.rendered.len(), 1);
        assert!(!site.path().join("output/main-content.txt").exists());
    }

    #[test]
    fn test_build_site_fail_fast() {
        let site = fixture_site();
        write(
            &site.path().join("page/broken.txt.j2"),
            r#"{{ include("missing") }}"#,
        );
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let err = builder.build_site(&json!({}), Path::new("")).unwrap_err();
        assert!(matches!(err, SiteError::Render { .. }));
        // "broken" sorts first, so nothing after it was rendered
        assert!(!site.path().join("output/main-content.txt").exists());
    }

    #[test]
    fn test_build_site_keep_going() {
        let site = fixture_site();
        write(
            &site.path().join("page/broken.txt.j2"),
            r#"{{ include("missing") }}"#,
        );
        write(&site.path().join("page/sub-path/bad.txt.j2"), r#"{{ json("{") }}"#);
        let builder =
            SiteBuilder::from_config(site.path(), &test_config()).with_fail_fast(false);
        let err = builder
            .build_site(&json!({"variable": "Variable"}), Path::new(""))
            .unwrap_err();
        match err {
            SiteError::Incomplete { rendered, failures } => {
                assert_eq!(rendered, 2);
                let pages: Vec<_> = failures.iter().map(|f| f.page.clone()).collect();
                assert_eq!(
                    pages,
                    vec![PathBuf::from("broken.txt.j2"), PathBuf::from("sub-path/bad.txt.j2")]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(site.path().join("output/main-content.txt").exists());
        assert!(site.path().join("output/sub-path/sub-content.txt").exists());
    }

    #[test]
    fn test_build_site_missing_pages_dir() {
        let dir = tempdir().unwrap();
        let builder = SiteBuilder::from_config(dir.path(), &test_config());
        let err = builder.build_site(&json!({}), Path::new("")).unwrap_err();
        assert!(matches!(err, SiteError::ReadDir { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_site_survives_symlink_cycle() {
        let site = fixture_site();
        std::os::unix::fs::symlink(
            site.path().join("page"),
            site.path().join("page/sub-path/loop"),
        )
        .unwrap();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let report = builder
            .build_site(&json!({"variable": "Variable"}), Path::new(""))
            .unwrap();
        assert_eq!(report.rendered.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_site_builds_sibling_symlink_alias() {
        let site = fixture_site();
        std::os::unix::fs::symlink(
            site.path().join("page/sub-path"),
            site.path().join("page/alias"),
        )
        .unwrap();
        let builder = SiteBuilder::from_config(site.path(), &test_config());
        let report = builder
            .build_site(&json!({"variable": "Variable"}), Path::new(""))
            .unwrap();
        assert_eq!(report.rendered.len(), 3);
        let output = site.path().join("output");
        assert!(output.join("alias/sub-content.txt").is_file());
        assert_eq!(
            read(&output.join("sub-path/sub-content.txt")),
            "sub-content - Variable - Sub page Controller Var"
        );
    }

    #[test]
    fn test_config_globals_under_params() {
        let site = fixture_site();
        write(&site.path().join("page/g.txt.j2"), "{{ site }} {{ variable }}");
        let mut config = test_config();
        config.globals.insert("site".to_string(), json!("Site"));
        config.globals.insert("variable".to_string(), json!("Global"));
        let builder = SiteBuilder::from_config(site.path(), &config);
        let out = builder
            .render(Path::new(""), "g.txt.j2", &json!({"variable": "Param"}))
            .unwrap();
        assert_eq!(read(&out), "Site Param");
    }

    #[test]
    fn test_html_pages_are_escaped() {
        let site = fixture_site();
        let config = SiteConfig {
            extension: "html".to_string(),
            ..test_config()
        };
        write(&site.path().join("page/index.html.j2"), "<p>{{ title }}</p>");
        let builder = SiteBuilder::from_config(site.path(), &config);
        let out = builder
            .render(Path::new(""), "index.html.j2", &json!({"title": "Tom & Jerry"}))
            .unwrap();
        assert_eq!(read(&out), "<p>Tom &amp; Jerry</p>");
    }
}
