//! Template rendering.

use std::path::{Path, PathBuf};

use govform_core::{WizardError, WizardResult};
use handlebars::Handlebars;
use serde_json::Value;
use tracing::{debug, info};

const TEMPLATE_EXTENSION: &str = "hbs";

/// Turns a named template and a JSON context into HTML.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> WizardResult<String>;

    fn has_template(&self, template: &str) -> bool;
}

/// Handlebars templates loaded from view directories.
///
/// `views/pages/eligibility/uk.hbs` is registered as
/// `pages/eligibility/uk`; anything under `partials/` becomes a partial
/// named by its path below that directory.
pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_dev_mode(false);
        Self { registry }
    }

    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> WizardResult<Self> {
        let mut renderer = Self::new();
        // Earlier directories take precedence, so register them last.
        for dir in dirs.iter().rev() {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "Views directory not found");
                continue;
            }
            for path in template_files(dir)? {
                let Some(name) = template_name(dir, &path) else {
                    continue;
                };
                let source = std::fs::read_to_string(&path)?;
                match name.strip_prefix("partials/") {
                    Some(partial) => renderer.register_partial(partial, &source)?,
                    None => renderer.register_template(&name, &source)?,
                }
            }
        }
        info!(
            templates = renderer.registry.get_templates().len(),
            "Loaded view templates"
        );
        Ok(renderer)
    }

    pub fn register_template(&mut self, name: &str, source: &str) -> WizardResult<()> {
        self.registry
            .register_template_string(name, source)
            .map_err(|e| WizardError::config(format!("template '{name}' is invalid: {e}")))
    }

    pub fn register_partial(&mut self, name: &str, source: &str) -> WizardResult<()> {
        self.registry
            .register_partial(name, source)
            .map_err(|e| WizardError::config(format!("partial '{name}' is invalid: {e}")))
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HandlebarsRenderer {
    fn render(&self, template: &str, context: &Value) -> WizardResult<String> {
        self.registry
            .render(template, context)
            .map_err(|e| WizardError::Internal(anyhow::anyhow!("rendering {template}: {e}")))
    }

    fn has_template(&self, template: &str) -> bool {
        self.registry.has_template(template)
    }
}

fn template_files(dir: &Path) -> WizardResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(TEMPLATE_EXTENSION) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn template_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
