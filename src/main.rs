use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use pagesmith::{SiteBuilder, SiteConfig, SiteError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the site root.
const CONFIG_FILE: &str = "pagesmith.yaml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Site root all configured paths are relative to
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Path to the YAML configuration file (default: <root>/pagesmith.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ParamArgs {
    /// JSON or YAML file with template parameters
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Template parameter, overrides the params file
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every page of the site
    Build {
        #[command(flatten)]
        params: ParamArgs,

        /// Render all pages even if some fail, then report every failure
        #[arg(long)]
        keep_going: bool,
    },
    /// Render a single page, given relative to the pages directory
    Render {
        page: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },
    /// Initialize a new site
    Init {
        /// Site directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        if let Some(SiteError::Incomplete { failures, .. }) = e.downcast_ref::<SiteError>() {
            for failure in failures {
                error!("  {:?}: {}", failure.page, failure.error);
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path } => init_site(&path),
        Commands::Build { params, keep_going } => {
            let config = load_config(&cli.root, cli.config.as_deref())?;
            let builder = SiteBuilder::from_config(&cli.root, &config);
            let builder = if keep_going {
                builder.with_fail_fast(false)
            } else {
                builder
            };
            let params = load_params(&params)?;
            let report = builder.build_site(&params, Path::new(""))?;
            info!(
                "✓ {} page(s) written to {:?}",
                report.rendered.len(),
                builder.root().output
            );
            Ok(())
        }
        Commands::Render { page, params } => {
            let config = load_config(&cli.root, cli.config.as_deref())?;
            let builder = SiteBuilder::from_config(&cli.root, &config);
            let file_name = page
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid page path: {:?}", page))?;
            let subdir = page.parent().unwrap_or(Path::new(""));
            let params = load_params(&params)?;
            let out = builder.render(subdir, file_name, &params)?;
            info!("✓ {:?}", out);
            Ok(())
        }
    }
}

fn load_config(root: &Path, config: Option<&Path>) -> Result<SiteConfig> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => {
            let default = root.join(CONFIG_FILE);
            if !default.exists() {
                info!("No {} found, using defaults", CONFIG_FILE);
                return Ok(SiteConfig::default());
            }
            default
        }
    };
    info!("Loading config from {:?}", path);
    SiteConfig::load(&path).with_context(|| format!("Failed to load config {:?}", path))
}

fn load_params(args: &ParamArgs) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    if let Some(path) = &args.params {
        info!("Loading parameters from {:?}", path);
        let content = std::fs::read_to_string(path).context("Failed to read params file")?;
        let value: Value = if path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
            serde_yaml::from_str(&content).context("Failed to parse YAML params")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON params")?
        };
        match value {
            Value::Object(map) => params.extend(map),
            Value::Null => {}
            _ => anyhow::bail!("Params file {:?} must contain a map", path),
        }
    }
    for (key, value) in &args.vars {
        params.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(params)
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_site(path: &Path) -> Result<()> {
    info!("Initializing site at {:?}", path);
    let config = SiteConfig::default();

    let pages = path.join(&config.pages_path);
    let wrappers = path.join(&config.wrappers_path);
    let includes = path.join(&config.includes_path);
    let controllers = path.join(&config.controller_path);
    for dir in [&pages, &wrappers, &includes, &controllers] {
        std::fs::create_dir_all(dir)?;
    }

    let config_content = r#"output_path: docs
controller_path: controllers
pages_path: templates/pages
wrappers_path: templates/partials/wrappers
includes_path: templates/partials/includes
extension: html
fail_fast: true

globals:
  site_name: "My Site"
"#;
    std::fs::write(path.join(CONFIG_FILE), config_content)?;

    let page = r#"{% filter wrap("layout", title="Home") %}
<h1>{{ heading }}</h1>
<ul>
{% for item in items %}  <li id="{{ item|slug }}">{{ loop.index }}/{{ loop.length }}: {{ item }}</li>
{% endfor %}</ul>
{% endfilter %}"#;
    std::fs::write(pages.join("index.html.j2"), page)?;

    let layout = r#"<!DOCTYPE html>
<html>
<head><title>{{ title }} | {{ site_name }}</title></head>
<body>
{{ include("nav") }}
{{ content }}
</body>
</html>
"#;
    std::fs::write(wrappers.join("layout.html.j2"), layout)?;

    let nav = r#"<nav><a href="index.html"{% if pagename.is.index %} class="active"{% endif %}>Home</a></nav>"#;
    std::fs::write(includes.join("nav.html.j2"), nav)?;

    let controller = r#"{
  "heading": "Welcome",
  "items": ["First item", "Second item"]
}
"#;
    std::fs::write(controllers.join("index.json"), controller)?;

    info!("✓ Site initialized successfully!");
    info!("  Run: pagesmith --root {:?} build", path);

    Ok(())
}
