//! Composition helpers exposed to page templates.
//!
//! * `wrap` (filter): renders a wrapper fragment around a block body,
//!   `{% filter wrap("layout", title="Home") %}...{% endfilter %}`.
//! * `include` (function): renders an include fragment inline,
//!   `{{ include("nav", active="home") }}`.
//! * `math` (function): `{{ math(a, "+", b) }}`.
//! * `json` (function): `{% for k, v in json('{"a": 1}')|items %}`.
//!
//! Fragments are read and rendered on every call; nothing is cached.

use log::debug;
use minijinja::value::{Kwargs, Value, ValueKind};
use minijinja::{Error, ErrorKind, State};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::SiteRoot;

/// How deeply wrappers and includes may nest before rendering fails.
pub const MAX_FRAGMENT_DEPTH: usize = 16;

thread_local! {
    static FRAGMENT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of fragment nesting for as long as it lives.
struct DepthGuard;

impl DepthGuard {
    fn enter(path: &std::path::Path) -> Result<Self, Error> {
        let depth = FRAGMENT_DEPTH.with(|d| d.get());
        if depth >= MAX_FRAGMENT_DEPTH {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!(
                    "fragments nested more than {} levels deep at {} (recursive wrap or include?)",
                    MAX_FRAGMENT_DEPTH,
                    path.display()
                ),
            ));
        }
        FRAGMENT_DEPTH.with(|d| d.set(depth + 1));
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        FRAGMENT_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Where wrapper and include fragments live and how their files are named.
#[derive(Debug, Clone)]
pub struct Fragments {
    wrappers: PathBuf,
    includes: PathBuf,
    extension: String,
    template_suffix: String,
}

impl Fragments {
    pub fn new(root: &SiteRoot) -> Self {
        Self {
            wrappers: root.wrappers.clone(),
            includes: root.includes.clone(),
            extension: root.extension.clone(),
            template_suffix: root.template_suffix.clone(),
        }
    }

    fn wrapper_path(&self, name: &str) -> PathBuf {
        self.wrappers.join(self.file_name(name))
    }

    fn include_path(&self, name: &str) -> PathBuf {
        self.includes.join(self.file_name(name))
    }

    fn file_name(&self, name: &str) -> String {
        format!("{}.{}.{}", name, self.extension, self.template_suffix)
    }
}

/// Renders the wrapper `name` with the current context, the keyword
/// arguments and `content` set to the rendered block body.
pub fn wrap(
    state: &State,
    fragments: &Fragments,
    body: String,
    name: &str,
    kwargs: Kwargs,
) -> Result<Value, Error> {
    let mut ctx = current_context(state);
    merge_kwargs(&mut ctx, &kwargs)?;
    ctx.insert("content".to_string(), Value::from_safe_string(body));
    render_fragment(state, fragments.wrapper_path(name), ctx)
}

/// Renders the include `name` with the current context and the keyword arguments.
pub fn include(
    state: &State,
    fragments: &Fragments,
    name: &str,
    kwargs: Kwargs,
) -> Result<Value, Error> {
    let mut ctx = current_context(state);
    merge_kwargs(&mut ctx, &kwargs)?;
    render_fragment(state, fragments.include_path(name), ctx)
}

fn current_context(state: &State) -> HashMap<String, Value> {
    let mut ctx = HashMap::new();
    for name in state.known_variables() {
        if let Some(value) = state.lookup(&name) {
            ctx.insert(name.to_string(), value);
        }
    }
    ctx
}

fn merge_kwargs(ctx: &mut HashMap<String, Value>, kwargs: &Kwargs) -> Result<(), Error> {
    for key in kwargs.args() {
        ctx.insert(key.to_string(), kwargs.get::<Value>(key)?);
    }
    Ok(())
}

fn render_fragment(
    state: &State,
    path: PathBuf,
    ctx: HashMap<String, Value>,
) -> Result<Value, Error> {
    debug!("Rendering fragment {:?}", path);
    let _depth = DepthGuard::enter(&path)?;
    let source = std::fs::read_to_string(&path).map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::TemplateNotFound
        } else {
            ErrorKind::InvalidOperation
        };
        Error::new(kind, format!("cannot read fragment {}", path.display())).with_source(e)
    })?;
    let name = path.to_string_lossy();
    let rendered = state
        .env()
        .render_named_str(&name, &source, Value::from(ctx))?;
    Ok(Value::from_safe_string(rendered))
}

/// Applies `operator` to both operands parsed as floats.
///
/// Unknown operators yield undefined. Integral results are returned as
/// integers so `10 + 20` renders as `30`; from 1e21 up they are rendered
/// in exponent form (`1e+21`).
pub fn math(left: Value, operator: String, right: Value) -> Value {
    let left = parse_float(&left);
    let right = parse_float(&right);
    let result = match operator.as_str() {
        "+" => left + right,
        "-" => left - right,
        "*" => left * right,
        "/" => left / right,
        "%" => left % right,
        _ => return Value::UNDEFINED,
    };
    number_value(result)
}

fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::from(n);
    }
    if n.abs() >= 1e21 {
        return Value::from(exponent_form(n));
    }
    if n.fract() == 0.0 {
        Value::from(n as i128)
    } else {
        Value::from(n)
    }
}

/// `1e21` becomes `1e+21`, `-2.5e-30` stays `-2.5e-30`.
fn exponent_form(n: f64) -> String {
    let formatted = format!("{:e}", n);
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => formatted,
    }
}

fn parse_float(value: &Value) -> f64 {
    match value.kind() {
        ValueKind::Number => f64::try_from(value.clone()).unwrap_or(f64::NAN),
        ValueKind::String => value.as_str().map_or(f64::NAN, parse_float_prefix),
        _ => f64::NAN,
    }
}

/// Parses the longest numeric prefix of `s`, ignoring leading whitespace.
/// `"10px"` is 10, `"abc"` is NaN.
fn parse_float_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }

    // exponent only counts when at least one digit follows
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or(f64::NAN)
}

/// Parses JSON text into a template value.
pub fn json(text: String) -> Result<Value, Error> {
    let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, "json() argument is not valid JSON").with_source(e)
    })?;
    Ok(Value::from_serialize(&parsed))
}
