use minijinja::value::{Kwargs, Value};
use minijinja::{Environment, Error, State, UndefinedBehavior};
use serde::Serialize;

use crate::helpers::{self, Fragments};

/// TemplateEngine wraps minijinja::Environment with the site composition helpers registered.
///
/// Helpers live on this instance only, so engines built for different sites
/// never see each other's wrappers or includes.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Creates a new TemplateEngine resolving fragments through `fragments`.
    pub fn new(fragments: Fragments) -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);

        let wrappers = fragments.clone();
        env.add_filter(
            "wrap",
            move |state: &State, body: String, name: String, kwargs: Kwargs| {
                helpers::wrap(state, &wrappers, body, &name, kwargs)
            },
        );
        env.add_function(
            "include",
            move |state: &State, name: String, kwargs: Kwargs| {
                helpers::include(state, &fragments, &name, kwargs)
            },
        );
        env.add_function("math", helpers::math);
        env.add_function("json", helpers::json);

        env.add_filter("slug", crate::filters::slug);

        Self { env }
    }

    /// Turns undefined variables into render errors instead of empty output.
    pub fn with_strict_undefined(mut self, strict: bool) -> Self {
        let behavior = if strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        };
        self.env.set_undefined_behavior(behavior);
        self
    }

    /// Registers a global variable in the template environment.
    pub fn add_global<T: Serialize>(&mut self, name: String, value: T) {
        self.env.add_global(name, Value::from_serialize(&value));
    }

    /// Renders a template source with the given context.
    ///
    /// `name` shows up in error messages and decides auto-escaping
    /// (`page.html.j2` escapes, `page.txt.j2` does not).
    pub fn render_str<T: Serialize>(
        &self,
        name: &str,
        source: &str,
        context: &T,
    ) -> Result<String, Error> {
        self.env.render_named_str(name, source, context)
    }
}
