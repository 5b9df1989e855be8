//! Issue body templates.
//!
//! Templates are Tera sources evaluated against the flattened form values of
//! a submission. Placeholders (`{{ symptom }}`) substitute a field verbatim,
//! and `{% if %}` blocks choose option-dependent fragments:
//!
//! ```text
//! {% if category_static_select == "Other" %}Other: {{ category_free_text_optional }}{% else %}{{ category_static_select }}{% endif %}
//! ```
//!
//! Autoescaping is disabled so submitted text reaches the tracker unchanged.

use std::collections::BTreeMap;

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("issue template `{name}` could not be parsed: {source}")]
    Parse {
        name: String,
        #[source]
        source: tera::Error,
    },
    #[error("issue template `{name}` could not be rendered: {source}")]
    Render {
        name: String,
        #[source]
        source: tera::Error,
    },
}

/// Submitted form values keyed by field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, String>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Blank values count as missing: Slack reports untouched inputs as empty.
    pub fn is_blank(&self, field: &str) -> bool {
        self.get(field).map(|value| value.trim().is_empty()).unwrap_or(true)
    }

    pub fn ensure_field(&mut self, field: &str) {
        self.0.entry(field.to_owned()).or_default();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FieldValues
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(field, value)| (field.into(), value.into())).collect())
    }
}

/// A parsed issue body template. Parsing happens once at registration so a
/// malformed template fails startup instead of a user's submission.
#[derive(Debug)]
pub struct IssueTemplate {
    name: String,
    tera: Tera,
}

impl IssueTemplate {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_template(&name, source)
            .map_err(|source| TemplateError::Parse { name: name.clone(), source })?;

        Ok(Self { name, tera })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, fields: &FieldValues) -> Result<String, TemplateError> {
        let context = Context::from_serialize(fields)
            .map_err(|source| TemplateError::Render { name: self.name.clone(), source })?;

        self.tera
            .render(&self.name, &context)
            .map_err(|source| TemplateError::Render { name: self.name.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValues, IssueTemplate, TemplateError};

    const CATEGORY: &str = "{% if category_static_select == \"Other\" %}Other: {{ category_free_text_optional }}{% else %}{{ category_static_select }}{% endif %}";

    #[test]
    fn placeholders_substitute_submitted_text_verbatim() {
        let template = IssueTemplate::parse("body", "Saw: {{ symptom }}\nWanted: {{ expected }}")
            .expect("template should parse");
        let fields = FieldValues::from_iter([
            ("symptom", "<b>cluster</b> & \"node\" stuck"),
            ("expected", "install completes"),
        ]);

        let body = template.render(&fields).expect("render");

        assert_eq!(body, "Saw: <b>cluster</b> & \"node\" stuck\nWanted: install completes");
    }

    #[test]
    fn conditional_branch_renders_free_text_for_other() {
        let template = IssueTemplate::parse("category", CATEGORY).expect("template should parse");
        let fields = FieldValues::from_iter([
            ("category_static_select", "Other"),
            ("category_free_text_optional", "Console plugin"),
        ]);

        assert_eq!(template.render(&fields).expect("render"), "Other: Console plugin");
    }

    #[test]
    fn conditional_branch_renders_selected_option_otherwise() {
        let template = IssueTemplate::parse("category", CATEGORY).expect("template should parse");
        let fields = FieldValues::from_iter([
            ("category_static_select", "SNO"),
            ("category_free_text_optional", "ignored"),
        ]);

        assert_eq!(template.render(&fields).expect("render"), "SNO");
    }

    #[test]
    fn unknown_placeholder_is_a_render_error() {
        let template = IssueTemplate::parse("body", "{{ missing }}").expect("template should parse");

        let error = template.render(&FieldValues::new()).expect_err("render should fail");

        assert!(matches!(error, TemplateError::Render { ref name, .. } if name == "body"));
    }

    #[test]
    fn malformed_template_fails_at_parse_time() {
        let error = IssueTemplate::parse("broken", "{% if x %}unterminated").expect_err("parse");

        assert!(matches!(error, TemplateError::Parse { .. }));
    }

    #[test]
    fn blank_and_missing_fields_are_both_blank() {
        let mut fields = FieldValues::from_iter([("title", "  ")]);
        assert!(fields.is_blank("title"));
        assert!(fields.is_blank("absent"));

        fields.ensure_field("absent");
        assert_eq!(fields.get("absent"), Some(""));
        assert_eq!(fields.len(), 2);
    }
}
