use super::{load_config, load_template};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pagecraft_editor::{
    DispatchOutcome, EditSession, EditorConfig, Intent, MemoryPersistence, Notice, NoticeLevel,
    PersistenceReport,
};
use pagecraft_model::Template;
use pagecraft_sync::{encode, PreviewMessage, RecordingTransport};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Template JSON file
    pub template: PathBuf,

    /// JSON array of intents, applied in order
    pub intents: PathBuf,

    /// Directory containing pagecraft.config.json
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the final template here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Make the first N persistence calls fail
    #[arg(long, default_value_t = 0)]
    pub fail_next: usize,
}

/// Everything a replay produced
#[derive(Debug)]
pub struct ReplayReport {
    pub outcomes: Vec<(&'static str, DispatchOutcome)>,
    pub persistence: Vec<PersistenceReport>,
    pub messages: Vec<PreviewMessage>,
    pub notices: Vec<Notice>,
    /// History guard refusals
    pub warnings: Vec<String>,
    pub template: Template,
}

pub fn replay(args: ReplayArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let template = load_template(&args.template)?;
    let source = fs::read_to_string(&args.intents)
        .with_context(|| format!("Cannot read intents {}", args.intents.display()))?;
    let intents: Vec<Intent> = serde_json::from_str(&source)
        .with_context(|| format!("Invalid intent script {}", args.intents.display()))?;

    println!(
        "{} {} intents against {}",
        "▶ Replaying".bright_blue().bold(),
        intents.len(),
        args.template.display()
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(run_script(template, config, intents, args.fail_next))?;

    print_report(&report)?;

    let output = report.template.to_json_pretty()?;
    match &args.out {
        Some(path) => {
            fs::write(path, output).with_context(|| format!("Cannot write {}", path.display()))?;
            println!("\n{} Final template → {}", "✅".green(), path.display());
        }
        None => {
            println!("\n{}", "Final template".bold());
            println!("{}", output);
        }
    }
    Ok(())
}

/// Run `intents` through a session backed by in-memory collaborators and
/// wait for every background call to finish
pub async fn run_script(
    template: Template,
    config: EditorConfig,
    intents: Vec<Intent>,
    fail_next: usize,
) -> Result<ReplayReport> {
    let registry = Arc::new(config.registry());
    let store = Arc::new(MemoryPersistence::new());
    store.fail_next(fail_next);
    let transport = Arc::new(RecordingTransport::new());

    let mut session = EditSession::new(template, config, registry, store, transport.clone())?;

    // The simulated surface already shows the loaded template
    let ready = encode(&PreviewMessage::PreviewReady {
        sections: session.template().sections.clone(),
    })?;
    session.handle_preview_message(&ready)?;

    let mut outcomes = Vec::with_capacity(intents.len());
    let mut persistence = Vec::new();
    for intent in intents {
        let name = intent.name();
        let outcome = session
            .dispatch(intent)
            .with_context(|| format!("Intent {} failed", name))?;
        outcomes.push((name, outcome));
        persistence.extend(session.process_persistence());
    }
    persistence.extend(session.settle().await);
    info!(
        intents = outcomes.len(),
        persisted = persistence.len(),
        "Replay finished"
    );

    Ok(ReplayReport {
        outcomes,
        persistence,
        messages: transport.messages(),
        notices: session.take_notices(),
        warnings: session.take_history_warnings(),
        template: session.template().clone(),
    })
}

fn print_report(report: &ReplayReport) -> Result<()> {
    println!("\n{}", "Intents".bold());
    for (name, outcome) in &report.outcomes {
        match outcome {
            DispatchOutcome::Applied {
                created_id: Some(id),
                ..
            } => println!("  {} {} ({})", "✓".green(), name, id),
            DispatchOutcome::Applied { .. } => println!("  {} {}", "✓".green(), name),
            DispatchOutcome::Rejected { notice, .. } => {
                println!("  {} {} - {}", "✗".red(), name, notice.message.red())
            }
            DispatchOutcome::Unchanged => println!("  {} {}", "·".dimmed(), name.dimmed()),
        }
    }

    println!("\n{}", "Preview messages".bold());
    for message in &report.messages {
        println!("  {} {}", "→".bright_blue(), encode(message)?);
    }

    println!("\n{}", "Persistence".bold());
    for entry in &report.persistence {
        match entry {
            PersistenceReport::Persisted { op } => println!("  {} {}", "✓".green(), op),
            PersistenceReport::Reconciled {
                temp_id,
                canonical_id,
            } => println!("  {} {} → {}", "✓".green(), temp_id, canonical_id),
            PersistenceReport::RolledBack { op, error } => {
                println!("  {} {} rolled back - {}", "✗".red(), op, error.red())
            }
            PersistenceReport::Superseded { op } => {
                println!("  {} {} superseded", "·".dimmed(), op)
            }
        }
    }

    for notice in &report.notices {
        match notice.level {
            NoticeLevel::Info => println!("{} {}", "ℹ".bright_blue(), notice.message),
            NoticeLevel::Error => println!("{} {}", "⚠️".yellow(), notice.message.yellow()),
        }
    }
    for warning in &report.warnings {
        println!("{} {}", "⚠️".yellow(), warning.dimmed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecraft_model::{Section, TypeDefinition};

    fn config() -> EditorConfig {
        let mut config = EditorConfig::default();
        config.block_types = serde_json::from_str::<Vec<TypeDefinition>>(
            r#"[{ "type": "group", "container": true }, { "type": "text" }]"#,
        )
        .unwrap();
        config
    }

    fn script(source: &str) -> Vec<Intent> {
        serde_json::from_str(source).unwrap()
    }

    fn template() -> Template {
        Template::new("home", "index").with_sections([Section::new("hero", "hero")])
    }

    #[tokio::test]
    async fn test_replay_reconciles_created_nodes() {
        let intents = script(
            r#"[
                { "intent": "addBlock", "parentId": "hero", "blockType": "group" },
                { "intent": "toggleEnabled", "nodeId": "hero" }
            ]"#,
        );

        let report = run_script(template(), config(), intents, 0).await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.notices.is_empty());
        assert!(report.warnings.is_empty());

        let section = report.template.find_section("hero").unwrap();
        assert_eq!(section.blocks[0].id, "srv-1");
        assert!(!section.enabled);
        assert!(report
            .persistence
            .iter()
            .any(|r| matches!(r, PersistenceReport::Reconciled { canonical_id, .. } if canonical_id == "srv-1")));
    }

    #[tokio::test]
    async fn test_replay_reports_rejections_and_rollbacks() {
        let intents = script(
            r#"[
                { "intent": "addSection", "sectionType": "banner" },
                { "intent": "move", "nodeId": "hero", "newParentId": "hero" }
            ]"#,
        );

        let report = run_script(template(), config(), intents, 1).await.unwrap();
        assert!(matches!(report.outcomes[1].1, DispatchOutcome::Rejected { .. }));
        assert_eq!(report.template, template());
        assert_eq!(report.notices.len(), 1);

        let kinds: Vec<&str> = report.messages.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["SECTION_ADD", "SECTION_DELETE"]);
    }
}
