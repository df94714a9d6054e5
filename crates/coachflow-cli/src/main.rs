//! CLI binary for running and validating Coachflow pipelines.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use coachflow_pipeline::{
    answer_visible, attend, find_cycle, linearize, validate, ConsoleFeedback, PipelineGraph,
    RunEvent, Session, SessionConfig, Transcript, WebSocketConnector,
};
use coachflow_types::DriverState;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "coachflow",
    version,
    about = "Drive a remote coaching session through a pipeline of role nodes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline against a remote session
    Run {
        /// Path to the pipeline .dot (or .json) file
        pipeline: PathBuf,

        /// Session WebSocket endpoint (default: ws://localhost:1337/ws)
        #[arg(long)]
        url: Option<String>,

        /// TOML session configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fail a step that waits longer than this for a marker
        #[arg(long)]
        wait_timeout_ms: Option<u64>,

        /// Write a JSON transcript of the run here
        #[arg(short, long)]
        transcript: Option<PathBuf>,

        /// Echo raw session output as it arrives
        #[arg(long)]
        show_output: bool,
    },

    /// Validate a pipeline file
    Validate {
        /// Path to the pipeline .dot (or .json) file
        pipeline: PathBuf,
    },

    /// Print the order in which a pipeline's edges run
    Order {
        /// Path to the pipeline .dot (or .json) file
        pipeline: PathBuf,
    },

    /// Show information about a pipeline
    Info {
        /// Path to the pipeline .dot (or .json) file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            pipeline,
            url,
            config,
            wait_timeout_ms,
            transcript,
            show_output,
        } => {
            let mut session_config = match config {
                Some(path) => SessionConfig::load(&path)?,
                None => SessionConfig::default(),
            };
            if let Some(url) = url {
                session_config.url = url;
            }
            if wait_timeout_ms.is_some() {
                session_config.wait_timeout_ms = wait_timeout_ms;
            }
            cmd_run(&pipeline, &session_config, transcript.as_deref(), show_output).await?;
        }
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Order { pipeline } => {
            cmd_order(&pipeline)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
    }

    Ok(())
}

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineGraph> {
    Ok(PipelineGraph::load(path)?)
}

fn warn_on_cycle(graph: &PipelineGraph) {
    if let Some(cycle) = find_cycle(graph.edges()) {
        println!("[WARN] Cycle: {}", cycle.join(" -> "));
    }
}

fn warn_on_missing_prompts(graph: &PipelineGraph) {
    for node in graph.nodes().iter().filter(|n| n.missing_prompt()) {
        println!(
            "[WARN] {}: {} has no prompt",
            node.id,
            node.effective_choice().describe(node.role)
        );
    }
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    let report = validate(&graph);
    warn_on_cycle(&graph);
    warn_on_missing_prompts(&graph);

    if report.is_valid() {
        println!("Pipeline is valid");
        return Ok(());
    }

    for diag in &report.diagnostics {
        println!("[ERROR] {}: {}", diag.code, diag.message);
    }
    std::process::exit(1);
}

fn cmd_order(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    warn_on_cycle(&graph);
    for (i, edge) in linearize(graph.edges()).iter().enumerate() {
        println!("{:>3}. {} -> {} ({})", i + 1, edge.source, edge.target, edge.id);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;

    if !graph.name.is_empty() {
        println!("Pipeline: {}", graph.name);
    }
    println!("Nodes: {}", graph.node_count());
    println!("Edges: {}", graph.edge_count());

    println!("\nNodes:");
    for node in graph.nodes() {
        let mut line = format!("  {} [{}]", node.id, node.role);
        if let Some(choice) = node.choice {
            line.push_str(&format!(" choice={} ({})", choice, choice.describe(node.role)));
        }
        if let Some(prompt) = &node.prompt {
            line.push_str(&format!(" prompt={prompt:?}"));
        } else if node.missing_prompt() {
            line.push_str(" (prompt missing)");
        }
        if node.selected {
            line.push_str(" selected");
        }
        println!("{line}");
    }

    Ok(())
}

async fn cmd_run(
    path: &Path,
    config: &SessionConfig,
    transcript: Option<&Path>,
    show_output: bool,
) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    warn_on_cycle(&graph);

    println!("Running pipeline: {}", graph.name);
    println!("Session: {}", config.url);

    let connector = Arc::new(WebSocketConnector::new(config.url.clone()));
    let session = Session::new(connector, config)?;

    // Subscribe before starting so no event is missed.
    let feedback_events = session.subscribe();
    let updates = session.updates();
    let started_at = chrono::Utc::now();

    let handle = match session.run(&graph).await {
        Ok(Some(handle)) => handle,
        Ok(None) => anyhow::bail!("a run is already executing"),
        Err(e) => {
            if e.is_user_error() {
                for diag in &validate(&graph).diagnostics {
                    println!("[ERROR] {}: {}", diag.code, diag.message);
                }
            }
            return Err(e.into());
        }
    };

    let order = session.execution_order().await;
    let selected: HashSet<String> = session.registry().await.selected_ids();
    let printer = tokio::spawn(async move {
        tokio::pin!(updates);
        while let Some(event) = updates.next().await {
            match event {
                RunEvent::OutputReceived { chunk } if show_output => {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                }
                RunEvent::AnswersExtracted {
                    first_index,
                    answers,
                } => {
                    for (offset, answer) in answers.iter().enumerate() {
                        if answer_visible(first_index + offset, &order, &selected) {
                            println!("\n=== {} ===\n{}", answer.title(), answer.text());
                        }
                    }
                }
                RunEvent::RunFinished { .. } => break,
                _ => {}
            }
        }
    });

    let provider = ConsoleFeedback::new();
    let final_state = tokio::select! {
        state = attend(&session, feedback_events, &provider) => state?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopping run");
            session.stop().await;
            DriverState::Failed
        }
    };
    let _ = handle.finished().await;
    let _ = printer.await;

    if let Some(path) = transcript {
        let record = Transcript::capture(&session, &graph.name, started_at).await;
        record.save(path).await?;
        println!("Transcript: {}", path.display());
    }

    let snapshot = session.snapshot().await;
    match final_state {
        DriverState::Done => {
            println!("\nPipeline completed ({} steps)", snapshot.cursor);
            Ok(())
        }
        _ => {
            let error = snapshot.error.unwrap_or_else(|| "unknown error".into());
            eprintln!("\nPipeline failed: {error}");
            std::process::exit(1);
        }
    }
}

