//! MiniJinja template renderer

use std::{fmt, path::Path};

use minijinja::{path_loader, Environment};
use serde_json::{Map, Value};

use crate::domain::notifications::TemplateRenderer;

/// Renders Jinja2-compatible templates by name
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    /// Load templates on demand from `directory`.
    ///
    /// A reference such as `notifications/email/welcome.html` resolves to
    /// that path below `directory`.
    pub fn from_directory(directory: impl AsRef<Path>) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(directory.as_ref()));

        Self { env }
    }

    /// Build a renderer from in-memory `(name, source)` pairs
    pub fn from_sources<I>(templates: I) -> Result<Self, minijinja::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = Environment::new();

        for (name, source) in templates {
            env.add_template_owned(name, source)?;
        }

        Ok(Self { env })
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template: &str, context: &Map<String, Value>) -> anyhow::Result<String> {
        let template = self.env.get_template(template)?;

        Ok(template.render(context)?)
    }
}

impl fmt::Debug for MiniJinjaRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniJinjaRenderer").finish_non_exhaustive()
    }
}
