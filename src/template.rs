//! Config file templating
//!
//! Uses Handlebars to render the engine and mixer config files. Both
//! templates ship with the binary and can be overridden by dropping
//! `engine.hbs` / `mixer.hbs` into the configured templates directory.

use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

use crate::constants::{ENGINE_TEMPLATE, MIXER_TEMPLATE};
use crate::error::TemplateError;

const ENGINE_TEMPLATE_SOURCE: &str = include_str!("../templates/engine.hbs");
const MIXER_TEMPLATE_SOURCE: &str = include_str!("../templates/mixer.hbs");

/// Renders config files from named templates
pub struct ConfigTemplater {
    handlebars: Handlebars<'static>,
}

impl ConfigTemplater {
    /// Create a templater with the built-in templates, overridden by any
    /// `<name>.hbs` found in `templates_dir`
    pub fn new(templates_dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut handlebars = Handlebars::new();
        // Config files, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, builtin) in [
            (ENGINE_TEMPLATE, ENGINE_TEMPLATE_SOURCE),
            (MIXER_TEMPLATE, MIXER_TEMPLATE_SOURCE),
        ] {
            let override_file = templates_dir.map(|dir| dir.join(format!("{name}.hbs")));
            let source = match override_file {
                Some(file) if file.is_file() => {
                    tracing::info!("Using template override {}", file.display());
                    std::fs::read_to_string(&file).map_err(|e| TemplateError::Register {
                        name: name.to_string(),
                        reason: format!("{}: {e}", file.display()),
                    })?
                }
                _ => builtin.to_string(),
            };

            handlebars
                .register_template_string(name, source)
                .map_err(|e| TemplateError::Register {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
        }

        Ok(Self { handlebars })
    }

    /// Render template `name` with `context`
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String, TemplateError> {
        if !self.handlebars.has_template(name) {
            return Err(TemplateError::UnknownTemplate(name.to_string()));
        }

        self.handlebars
            .render(name, context)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }
}
