//! Annotation rendering from label sets.
//!
//! Each annotation is a handlebars template referencing label names, e.g.
//! `"{{host}} is down"`. Substituted values are HTML-escaped and unknown
//! labels render as the empty string.

use handlebars::Handlebars;
use indexmap::IndexMap;

use crate::message::{AnnotationSet, LabelSet};

/// Compiled annotation templates for one job
pub struct AnnotationRenderer {
    registry: Handlebars<'static>,
    names: Vec<String>,
}

impl AnnotationRenderer {
    /// Compile every template.
    ///
    /// A template that fails to compile is logged and left out; it never
    /// prevents the others from being used.
    pub fn new(templates: &IndexMap<String, String>) -> Self {
        let mut registry = Handlebars::new();
        let mut names = Vec::with_capacity(templates.len());

        for (name, template) in templates {
            match registry.register_template_string(name, template) {
                Ok(()) => names.push(name.clone()),
                Err(err) => {
                    tracing::error!(name = %name, template = %template, error = %err, "invalid template");
                }
            }
        }

        Self { registry, names }
    }

    /// Render every compiled template against `labels`.
    ///
    /// Entries that fail to render are logged and omitted from the result.
    pub fn render(&self, labels: &LabelSet) -> AnnotationSet {
        let mut annotations = AnnotationSet::new();

        for name in &self.names {
            match self.registry.render(name, labels) {
                Ok(text) => {
                    annotations.insert(name.clone(), text);
                }
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "failed to execute template");
                }
            }
        }

        annotations
    }

    /// Names of the templates that compiled.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
