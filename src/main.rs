use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pairpad::analysis::PanelState;
use pairpad::config::{setup_api_key_interactive, Config};
use pairpad::llm::prompts::RUBBER_DUCK_FALLBACK;
use pairpad::llm::{LanguageModel, OpenRouterClient};
use pairpad::voice::{ConsoleSpeaker, TurnOutcome, TypedCapture};
use pairpad::{EditorMode, Studio, StudioUpdate, Workspace};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pairpad",
    about = "Explain, review, and edit code with an AI pair, or talk it through with a rubber duck",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explain or review every function in a file
    Explain(ExplainArgs),
    /// Edit a file from a plain-language instruction
    Vibe(VibeArgs),
    /// Talk a problem through with the rubber duck (type instead of speaking)
    Duck,
    /// Show the resolved configuration
    Config(ConfigArgs),
    /// Store an API key in the system keychain
    Setup,
}

#[derive(Args, Debug)]
struct ExplainArgs {
    path: PathBuf,
    #[arg(long, value_enum, default_value_t = ModeArg::Teacher)]
    mode: ModeArg,
    /// Functions per model request
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Args, Debug)]
struct VibeArgs {
    path: PathBuf,
    instruction: String,
    /// Write the result back to the file instead of printing it
    #[arg(long)]
    write: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Write the resolved configuration to the config file
    #[arg(long)]
    save: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Teacher,
    Reviewer,
}

impl From<ModeArg> for EditorMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Teacher => EditorMode::Teacher,
            ModeArg::Reviewer => EditorMode::Reviewer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load();

    match cli.command {
        Commands::Explain(args) => {
            if let Some(size) = args.batch_size {
                config.analysis.batch_size = size.max(1);
            }
            run_explain(&config, &args.path, args.mode.into()).await
        }
        Commands::Vibe(args) => run_vibe(&config, &args).await,
        Commands::Duck => run_duck(&config).await,
        Commands::Config(args) => show_config(&config, args.save),
        Commands::Setup => setup_api_key_interactive().map_err(|e| anyhow!(e)),
    }
}

fn model_for(config: &Config) -> Arc<dyn LanguageModel> {
    let client = OpenRouterClient::from_config(config);
    if !client.has_credential() {
        eprintln!("  No API key found. Run 'pairpad setup' or set PAIRPAD_API_KEY.");
    }
    Arc::new(client)
}

/// Load a file into a one-file studio and make it active.
fn studio_for(config: &Config, path: &Path) -> Result<(Studio, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let workspace = Workspace::with_files([(file_name.clone(), content)])?;
    let mut studio = Studio::new(model_for(config), config, workspace);
    studio.open_file(&file_name)?;
    Ok((studio, file_name))
}

async fn run_explain(config: &Config, path: &Path, mode: EditorMode) -> Result<()> {
    let (mut studio, file_name) = studio_for(config, path)?;
    info!(file = %file_name, mode = mode.label(), "explaining file");
    studio.set_mode(mode);

    if studio.board().state() == PanelState::NothingToAnalyze {
        println!("No functions found in {}.", file_name);
        return Ok(());
    }

    while let Some(update) = studio.next_update().await {
        match update {
            StudioUpdate::EntriesMerged { added, .. } => {
                let entries = studio.board().entries();
                for entry in &entries[entries.len().saturating_sub(added)..] {
                    println!("── {} ──", entry.unit_name);
                    println!("{}\n", entry.text);
                }
            }
            StudioUpdate::AnalysisDone { .. } => break,
            _ => {}
        }
    }

    if let Some(notice) = studio.board().notice() {
        eprintln!("  {}", notice);
    }
    let usage = studio.board().usage();
    if usage.total_tokens > 0 {
        eprintln!("  {} tokens, ${:.4}", usage.total_tokens, usage.cost());
    }
    Ok(())
}

async fn run_vibe(config: &Config, args: &VibeArgs) -> Result<()> {
    let (mut studio, file_name) = studio_for(config, &args.path)?;
    studio.set_mode(EditorMode::Vibe);
    studio.request_vibe_edit(&args.instruction)?;

    let mut applied = false;
    for update in studio.settle().await {
        if let StudioUpdate::VibeFinished { applied: a, .. } = update {
            applied = a;
        }
    }
    if let Some(status) = studio.status() {
        eprintln!("  {}", status);
    }
    if !applied {
        return Err(anyhow!("No changes were made to {}", file_name));
    }

    let content = studio
        .workspace()
        .content(&file_name)
        .ok_or_else(|| anyhow!("{} disappeared during the edit", file_name))?;
    if args.write {
        std::fs::write(&args.path, content)
            .with_context(|| format!("Failed to write {}", args.path.display()))?;
        eprintln!("  + Wrote {}", args.path.display());
    } else {
        print!("{}", content);
    }
    Ok(())
}

async fn run_duck(config: &Config) -> Result<()> {
    let studio = Studio::new(model_for(config), config, Workspace::new());
    let capture = Arc::new(TypedCapture::new());
    let mut session = studio.voice_session(capture.clone(), Arc::new(ConsoleSpeaker::new("duck> ")));

    println!("Tell the duck what's going on. Say 'done' when you're finished.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            session.end();
            break;
        };

        session.start_listening()?;
        capture.push_line(&line);
        match session.complete_turn().await? {
            TurnOutcome::Exited | TurnOutcome::Cancelled => {
                println!("duck> Good luck!");
                break;
            }
            TurnOutcome::Fallback => println!("duck> {}", RUBBER_DUCK_FALLBACK),
            TurnOutcome::Empty | TurnOutcome::Replied(_) => {}
        }
    }
    Ok(())
}

fn show_config(config: &Config, save: bool) -> Result<()> {
    if save {
        config.save().map_err(|e| anyhow!(e))?;
        eprintln!("  + Saved {}", Config::config_location());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("  Config file: {}", Config::config_location());
    let credential = if config.has_api_key() {
        "available"
    } else {
        "missing (run 'pairpad setup')"
    };
    println!("  API key: {}", credential);
    Ok(())
}
