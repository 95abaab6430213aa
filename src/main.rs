mod api;
mod error;
mod export;
mod options;
mod pipeline;
mod scene;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use api::GeminiClient;
use error::Result;
use export::PackageWriter;
use pipeline::Orchestrator;
use scene::UserInput;

#[derive(Parser, Debug)]
#[command(name = "cineprompt")]
#[command(about = "Cinematic multi-scene prompt package generator using AI", long_about = None)]
struct Args {
    /// Gemini API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory the prompt package is written to
    #[arg(short = 'w', long, global = true, default_value = "./output")]
    work_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a scene sequence and its keyframe images
    Generate {
        /// Scenario text
        #[arg(short, long)]
        scenario: Option<String>,

        /// Read the scenario from a file instead
        #[arg(short = 'f', long)]
        scenario_file: Option<PathBuf>,

        /// Duration category (14_seconds or 21_seconds)
        #[arg(short, long, default_value = "14_seconds")]
        duration: String,

        #[arg(long, default_value = "African Savanna")]
        environment: String,

        #[arg(long, default_value = "Golden Hour")]
        time_of_day: String,

        #[arg(long, default_value = "Tense")]
        mood: String,

        #[arg(short, long, default_value = "9:16")]
        aspect_ratio: String,

        /// Optional reference video whose style and pacing influence the prompts
        #[arg(long)]
        reference_video: Option<PathBuf>,
    },

    /// Generate from randomized selections
    Lucky,

    /// Revise one scene's keyframe in a previously generated package
    Revise {
        /// 1-based scene number to revise
        #[arg(short, long)]
        scene: u32,

        /// Free-text edit instruction
        instruction: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();

    let api_key = if let Some(key) = args.api_key {
        key
    } else if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        key
    } else {
        eprintln!("Error: GEMINI_API_KEY not found. Please set it via --api-key or the GEMINI_API_KEY environment variable");
        std::process::exit(1);
    };

    let outcome = match args.command {
        Command::Generate {
            scenario,
            scenario_file,
            duration,
            environment,
            time_of_day,
            mood,
            aspect_ratio,
            reference_video,
        } => {
            let scenario = match (scenario, scenario_file) {
                (_, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .context(format!("Failed to read file: {}", path.display()))?,
                (Some(text), None) => text,
                (None, None) => {
                    "A brave cheetah hunts a gazelle near a hidden hunter's trap".to_string()
                }
            };
            let input = UserInput {
                scenario,
                duration,
                environment,
                time_of_day,
                mood,
                aspect_ratio,
                reference_video,
            };
            run_generate(input, api_key, args.work_dir).await
        }
        Command::Lucky => {
            let input = options::random_input();
            info!("Feeling lucky: {}", input.scenario);
            run_generate(input, api_key, args.work_dir).await
        }
        Command::Revise { scene, instruction } => {
            run_revise(scene, &instruction, api_key, args.work_dir).await
        }
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Done.");
    Ok(())
}

/// One full run: sequence round trip, sequential keyframes, package on
/// disk. A run-level error still leaves whatever settled in the package,
/// then fails the process.
async fn run_generate(input: UserInput, api_key: String, work_dir: PathBuf) -> Result<()> {
    info!("Starting prompt package generation...");

    let client = GeminiClient::new(api_key);
    let mut orchestrator = Orchestrator::new(client);
    orchestrator.on_change(|state| {
        if let Some(slots) = state.scenes.as_deref() {
            let settled = slots.iter().filter(|s| !s.is_generating).count();
            info!("Progress: {}/{} scenes settled", settled, slots.len());
        }
    });

    orchestrator.run(&input).await;

    let writer = PackageWriter::new(&work_dir);
    writer.write_run(&input, orchestrator.state()).await?;

    if let Some(message) = &orchestrator.state().error {
        return Err(error::PromptError::Api(message.clone()));
    }
    Ok(())
}

/// Revises one scene of an exported run and rewrites the package, error
/// or not, so the manifest always reflects the latest state.
async fn run_revise(
    scene: u32,
    instruction: &str,
    api_key: String,
    work_dir: PathBuf,
) -> Result<()> {
    let writer = PackageWriter::new(&work_dir);
    let manifest = writer.load_manifest().await?;

    let client = GeminiClient::new(api_key);
    let mut orchestrator = Orchestrator::new(client);
    orchestrator.restore(manifest.state);

    let outcome = orchestrator.revise(scene, instruction).await;
    writer.write_run(&manifest.input, orchestrator.state()).await?;
    outcome
}
