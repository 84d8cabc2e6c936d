//! Email template catalog and minijinja rendering.
//!
//! Templates use `{{ key.path }}` placeholders resolved against the
//! per-recipient parameters. A fresh [`minijinja::Environment`] is created
//! per render call since template bodies are plain strings.

use serde::Serialize;
use serde_json::Value;

use crate::traits::MailError;

/// A named email template with subject, HTML and plain-text bodies.
#[derive(Debug, Clone, Serialize)]
pub struct EmailTemplate {
    pub id: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// The rendered parts of an [`EmailTemplate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Renders template strings with minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env
    }

    /// Render a template string against `params`. Unknown keys render empty.
    pub fn render(&self, template_str: &str, params: &Value) -> Result<String, MailError> {
        let env = Self::build_env();
        env.render_str(template_str, params)
            .map_err(|e| MailError::Template(e.to_string()))
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), MailError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| MailError::Template(e.to_string()))?;
        Ok(())
    }

    pub fn render_template(
        &self,
        template: &EmailTemplate,
        params: &Value,
    ) -> Result<RenderedEmail, MailError> {
        Ok(RenderedEmail {
            subject: self.render(&template.subject, params)?,
            html: self.render(&template.html, params)?,
            text: self.render(&template.text, params)?,
        })
    }
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Read-only set of templates addressable by id.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<EmailTemplate>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<EmailTemplate>) -> Self {
        Self { templates }
    }

    /// The greeting templates shipped with the agent.
    pub fn builtin() -> Self {
        Self::new(vec![
            EmailTemplate {
                id: "Template1".to_string(),
                subject: "Hi {{ name | default('there') }}! 👋".to_string(),
                html: r#"<h2 style="margin:0 0 8px">This is the Hello 1 template. Thank you very much!</h2>"#
                    .to_string(),
                text: "Hi {{ name | default('there') }}! This is the Hello 1 template. Thank you very much!"
                    .to_string(),
            },
            EmailTemplate {
                id: "Template2".to_string(),
                subject: "Quick check-in 💬".to_string(),
                html: concat!(
                    r#"<h2 style="margin:0 0 8px">Hi again{{ ', ' ~ name if name }}!</h2>"#,
                    "<p>This is the <b>Hello 2</b> template, just checking in.</p>",
                    "<p>Everything running smoothly?</p>"
                )
                .to_string(),
                text: "Hi again{{ ', ' ~ name if name }}! This is Hello 2, just checking in. Everything running smoothly?"
                    .to_string(),
            },
            EmailTemplate {
                id: "Template3".to_string(),
                subject: "Special greetings ✨".to_string(),
                html: concat!(
                    r#"<h2 style="margin:0 0 8px">Greetings from {{ sender | default('AI Agent') }}</h2>"#,
                    "<p>This is <b>Hello 3</b>, a slightly fancier message.</p>",
                    "<p>Stay awesome!</p>"
                )
                .to_string(),
                text: "Greetings from {{ sender | default('AI Agent') }}. This is Hello 3. Stay awesome!"
                    .to_string(),
            },
        ])
    }

    pub fn get(&self, id: &str) -> Option<&EmailTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn all(&self) -> &[EmailTemplate] {
        &self.templates
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
