pub mod check;
pub mod replay;

pub use check::{check, CheckArgs};
pub use replay::{replay, ReplayArgs};

use anyhow::{Context, Result};
use pagecraft_editor::EditorConfig;
use pagecraft_model::Template;
use std::fs;
use std::path::Path;

/// Read a template file; positions are recomputed on load
pub fn load_template(path: &Path) -> Result<Template> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Cannot read template {}", path.display()))?;
    Template::from_json(&source).with_context(|| format!("Invalid template {}", path.display()))
}

/// Load `pagecraft.config.json` from `dir`, or the current directory
pub fn load_config(dir: Option<&Path>) -> Result<EditorConfig> {
    let dir = dir.unwrap_or_else(|| Path::new("."));
    EditorConfig::load(dir).with_context(|| format!("Invalid configuration in {}", dir.display()))
}
