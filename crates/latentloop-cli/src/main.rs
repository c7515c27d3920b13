use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use latentloop_contracts::chat::Inbound;
use latentloop_contracts::config::SearchConfig;
use latentloop_contracts::events::EventWriter;
use latentloop_contracts::runs::summary::write_summary;
use latentloop_engine::{default_provider_registry, InMemorySessionStore, Reply, SearchEngine};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "latentloop", version, about = "Interactive latent-space image search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Models(ModelsArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "local")]
    user: String,
    /// Register only the dryrun provider; no inference service is contacted.
    #[arg(long)]
    offline: bool,
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("latentloop error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Models(args) => {
            run_models(args)?;
            Ok(0)
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = SearchConfig::load(args.config.as_deref())?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating output dir {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(&events_path, format!("chat-{}", std::process::id()));
    let providers = default_provider_registry(&config, args.offline)?;
    let engine = SearchEngine::new(
        config,
        providers,
        Arc::new(InMemorySessionStore::new()),
        events,
    )?;

    println!("latentloop chat started. Type /help for commands.");
    present_replies(&args.out, engine.handle(&args.user, Inbound::Start)?)?;

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let replies = engine.handle_text(&args.user, input)?;
        present_replies(&args.out, replies)?;
    }
    Ok(())
}

fn run_models(args: ModelsArgs) -> Result<()> {
    let config = SearchConfig::load(args.config.as_deref())?;
    let registry = config.model_registry();
    if args.json {
        let models = registry.list().collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&json!({ "models": models }))?);
        return Ok(());
    }
    for model in registry.list() {
        let status = if model.enabled { "enabled" } else { "disabled" };
        println!(
            "{}\t{}\tdim={}\t{}\t{}",
            model.name, model.provider, model.seed_dimension, status, model.description
        );
    }
    Ok(())
}

/// Prints notices and writes grids, reveals and the session summary under
/// `out/<session>/`.
fn present_replies(out: &Path, replies: Vec<Reply>) -> Result<()> {
    let mut revealed_files = Vec::new();
    for reply in replies {
        match reply {
            Reply::Notice(notice) => println!("{notice}"),
            Reply::Grid {
                session_id,
                stage,
                image,
            } => {
                let path = out.join(&session_id).join(format!("round-{stage:02}.png"));
                save_png(&image, &path)?;
                println!("Grid: {}", path.display());
            }
            Reply::Reveal {
                session_id,
                label,
                record,
            } => {
                let file_name = format!("result-{}.png", revealed_files.len() + 1);
                let path = out.join(&session_id).join(&file_name);
                save_png(&record.image, &path)?;
                println!(
                    "Your {label}: round {}, image {}, score {} ({})",
                    record.stage,
                    record.index,
                    record.score,
                    path.display()
                );
                revealed_files.push(file_name);
            }
            Reply::Finished(mut summary) => {
                for (pick, file_name) in summary.picks.iter_mut().zip(&revealed_files) {
                    pick.image_file = Some(file_name.clone());
                }
                let path = out.join(&summary.session_id).join("summary.json");
                write_summary(&path, &summary)?;
                println!("Summary: {}", path.display());
            }
        }
    }
    Ok(())
}

fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .with_context(|| format!("failed writing {}", path.display()))
}
