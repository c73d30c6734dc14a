//! Sandboxed Jinja environment used by template steps.
//!
//! Templates only see the values injected here: `ctx` (the raw context),
//! `doc` (the resolved graph), `secrets`, `vars`, optionally `requests`, and
//! the `fail` function. Rendering is bounded by a fuel limit.

pub mod filters;
pub mod requests;

use crate::config::TemplatingConfig;
use crate::context::{DocView, DocumentContext};
use crate::plugin::DocumentPlugin;
use minijinja::{Environment, Error, ErrorKind, Value};
use parking_lot::Mutex;
use requests::RequestsClient;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Upper bound of template instructions per render.
const RENDER_FUEL: u64 = 50_000_000;

/// Template rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template called `fail(message)`.
    #[error("{0}")]
    UserFailure(String),
    /// Template syntax or runtime error.
    #[error("template error: {0}")]
    Render(String),
    /// Configuration of the environment is invalid.
    #[error("templating setup failed: {0}")]
    Setup(String),
}

impl From<Error> for TemplateError {
    fn from(err: Error) -> Self {
        Self::Render(format!("{err:#}"))
    }
}

/// Values shared by every render of the process.
pub struct Templating {
    secrets: Value,
    vars: Value,
    requests: Option<Arc<RequestsClient>>,
    plugins: Vec<Arc<dyn DocumentPlugin>>,
}

impl std::fmt::Debug for Templating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templating")
            .field("requests", &self.requests.is_some())
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

impl Templating {
    /// Build the shared environment settings.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &TemplatingConfig) -> Result<Self, TemplateError> {
        let requests = RequestsClient::from_config(&config.requests)
            .map_err(|err| TemplateError::Setup(err.to_string()))?
            .map(Arc::new);
        Ok(Self {
            secrets: Value::from_serialize(&config.secrets),
            vars: Value::from_serialize(&config.vars),
            requests,
            plugins: Vec::new(),
        })
    }

    /// Register plugins allowed to extend the environment.
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Arc<dyn DocumentPlugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Render `template` from `dir` against the context.
    ///
    /// Blocks the calling thread; call from a blocking task. `extra` adds
    /// variables next to `ctx` and `doc`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::UserFailure`] if the template called `fail`,
    /// [`TemplateError::Render`] for any other template error.
    pub fn render(
        &self,
        dir: &Path,
        template: &str,
        raw: &serde_json::Value,
        doc: &Arc<DocumentContext>,
        extra: &[(&str, Value)],
    ) -> Result<String, TemplateError> {
        let failure = Arc::new(Mutex::new(None::<String>));
        let mut env = self.environment(dir, &failure);

        let mut vars: Vec<(&str, Value)> = vec![
            ("ctx", Value::from_serialize(raw)),
            ("doc", DocView::value(Arc::clone(doc))),
        ];
        vars.extend(extra.iter().cloned());
        if let (Some(client), Ok(handle)) = (&self.requests, Handle::try_current()) {
            vars.push(("requests", client.session(handle)));
        }
        for plugin in &self.plugins {
            plugin.extend_environment(&mut env);
        }

        let result = env
            .get_template(template)
            .and_then(|tmpl| tmpl.render(vars.into_iter().collect::<Value>()));
        match result {
            Ok(rendered) => Ok(rendered),
            Err(err) => Err(failure.lock().take().map_or_else(|| err.into(), TemplateError::UserFailure)),
        }
    }

    fn environment(&self, dir: &Path, failure: &Arc<Mutex<Option<String>>>) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(dir));
        env.set_fuel(Some(RENDER_FUEL));
        env.add_global("secrets", self.secrets.clone());
        env.add_global("vars", self.vars.clone());

        env.add_filter("of_alphabet", filters::of_alphabet);
        env.add_filter("roman", filters::roman);
        env.add_filter("datetime_format", filters::datetime_format);
        env.add_filter("reply_path", filters::reply_path);
        env.add_filter("dot", filters::dot);

        let slot = Arc::clone(failure);
        env.add_function("fail", move |message: String| -> Result<Value, Error> {
            *slot.lock() = Some(message.clone());
            Err(Error::new(ErrorKind::InvalidOperation, message))
        });
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn templating() -> Templating {
        let mut config = TemplatingConfig::default();
        config.secrets.insert("api_key".into(), "s3cr3t".into());
        config.vars.insert("brand".into(), "Acme".into());
        Templating::new(&config).unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_renders_with_context_and_globals() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html.j2", "{{ vars.brand }}/{{ secrets.api_key }}/{{ ctx.title }}/{{ 3|roman }}");

        let out = templating()
            .render(
                dir.path(),
                "index.html.j2",
                &json!({"title": "Plan"}),
                &Arc::new(DocumentContext::default()),
                &[],
            )
            .unwrap();
        assert_eq!(out, "Acme/s3cr3t/Plan/III");
    }

    #[test]
    fn test_fail_is_reported_as_user_failure() {
        let dir = TempDir::new().unwrap();
        write(&dir, "t.j2", "{% if not ctx.ready %}{{ fail('Questionnaire is not complete') }}{% endif %}");

        let err = templating()
            .render(dir.path(), "t.j2", &json!({}), &Arc::new(DocumentContext::default()), &[])
            .unwrap_err();
        assert!(matches!(err, TemplateError::UserFailure(ref m) if m == "Questionnaire is not complete"));
    }

    #[test]
    fn test_include_resolves_from_template_dir() {
        let dir = TempDir::new().unwrap();
        write(&dir, "part.j2", "[{{ original }}]");
        write(&dir, "main.j2", "{% include 'part.j2' %}");

        let out = templating()
            .render(
                dir.path(),
                "main.j2",
                &json!({}),
                &Arc::new(DocumentContext::default()),
                &[("original", Value::from("x"))],
            )
            .unwrap();
        assert_eq!(out, "[x]");
    }

    #[test]
    fn test_missing_template_is_render_error() {
        let dir = TempDir::new().unwrap();
        let err = templating()
            .render(dir.path(), "nope.j2", &json!({}), &Arc::new(DocumentContext::default()), &[])
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_runaway_loop_runs_out_of_fuel() {
        let dir = TempDir::new().unwrap();
        write(&dir, "loop.j2", "{% for i in range(100000) %}{% for j in range(100000) %}{% endfor %}{% endfor %}");
        let err = templating()
            .render(dir.path(), "loop.j2", &json!({}), &Arc::new(DocumentContext::default()), &[])
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }
}
