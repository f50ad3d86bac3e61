//! Template placeholder substitution
//!
//! Two modes, selected by the builder kind that owns the template body.
//! Plain mode replaces `{{key}}` tokens in text. Structure-aware mode
//! decodes the body as JSON, substitutes into every string leaf and
//! re-encodes; if the body does not decode, it logs a warning and falls
//! back to plain substitution of the raw text. Unmatched placeholders are
//! always left verbatim.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::models::{BuilderKind, Row, Template};

pub struct TemplateEngine {
    placeholder: Regex,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{([^{}]+)\}\}").unwrap(),
        }
    }

    /// Plain-mode substitution of `{{key}}` tokens against the row
    pub fn substitute(&self, text: &str, row: &Row) -> String {
        self.placeholder
            .replace_all(text, |caps: &regex::Captures| {
                let key = caps[1].trim();
                match row.get(key) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Render the template body for a builder kind
    pub fn render_body(&self, template: &Template, builder: BuilderKind, row: &Row) -> String {
        if !builder.is_structured() {
            return self.substitute(&template.body, row);
        }

        match serde_json::from_str::<Value>(&template.body) {
            Ok(document) => {
                let transformed = self.transform(document, row);
                serde_json::to_string(&transformed).unwrap_or_else(|_| template.body.clone())
            }
            Err(e) => {
                warn!(
                    template_id = template.id,
                    "Template body is not valid JSON ({e}), falling back to plain substitution"
                );
                self.substitute(&template.body, row)
            }
        }
    }

    /// Metadata pairs for the new record: the template's own metadata with
    /// plain substitution applied, then the builder contract flags. Contract
    /// flags always win over template-carried values for the same keys.
    pub fn render_meta(
        &self,
        template: &Template,
        builder: BuilderKind,
        row: &Row,
    ) -> Vec<(String, String)> {
        let mut meta: Vec<(String, String)> = template
            .meta
            .iter()
            .map(|(key, value)| (key.clone(), self.substitute(value, row)))
            .collect();

        for (key, value) in builder.meta_contract() {
            meta.retain(|(k, _)| k != key);
            meta.push((key.to_string(), value.to_string()));
        }

        meta
    }

    /// Recursively substitute into every string leaf, returning a new value.
    /// The input is consumed; nothing is mutated through references.
    fn transform(&self, value: Value, row: &Row) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute(&s, row)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.transform(item, row))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.transform(item, row)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
