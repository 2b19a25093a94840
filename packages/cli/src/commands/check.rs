use super::load_config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pagecraft_model::Template;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Template JSON file
    pub template: PathBuf,

    /// Directory containing pagecraft.config.json
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn check(args: CheckArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let registry = config.registry();

    println!(
        "{} {}",
        "🔍 Checking".bright_blue().bold(),
        args.template.display()
    );

    let source = fs::read_to_string(&args.template)
        .with_context(|| format!("Cannot read template {}", args.template.display()))?;
    let template = Template::from_json_checked(&source, &registry)
        .with_context(|| format!("{} is not a valid template", args.template.display()))?;
    debug!(template_id = %template.id, "Template passed invariant checks");

    println!(
        "  {} {} sections, {} nodes",
        "✓".green(),
        template.sections.len(),
        template.node_count()
    );
    Ok(())
}
