//! Template renderer contract

#[cfg(test)]
use mockall::mock;
use serde_json::{Map, Value};

/// Renders a named template with a context
pub trait TemplateRenderer: Send + Sync + 'static {
    /// Render `template` with `context`
    ///
    /// # Arguments
    /// * `template` - The template reference, e.g. `notifications/email/order_not_paid`.
    /// * `context` - Variables available to the template.
    ///
    /// # Returns
    /// The rendered body, or the renderer's own error unchanged.
    fn render(&self, template: &str, context: &Map<String, Value>) -> anyhow::Result<String>;
}

#[cfg(test)]
mock! {
    pub TemplateRenderer {}

    impl TemplateRenderer for TemplateRenderer {
        fn render(&self, template: &str, context: &Map<String, Value>) -> anyhow::Result<String>;
    }
}
