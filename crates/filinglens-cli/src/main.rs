use std::io::Write;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use filinglens_core::fetch::{RetrievalQuery, SourceToggles};
use filinglens_core::llm::{GeminiClient, KeyRotator, StreamChunk};
use filinglens_core::pipeline::StepOutcome;
use filinglens_core::session::SessionStore;
use filinglens_core::{Config, FileSessionStore, PipelineController};

#[derive(Parser)]
#[command(name = "filinglens")]
#[command(about = "Answer questions from filings, announcements, and transcripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about a company
    Ask {
        /// The question to answer
        #[arg(required = true)]
        question: Vec<String>,

        /// Ticker or stock code of the company
        #[arg(long, short)]
        entity: String,

        /// Whole calendar years to look back
        #[arg(long, short, default_value_t = 3)]
        years: u32,

        /// Skip the regulatory filing registry
        #[arg(long)]
        no_filings: bool,

        /// Include exchange announcements
        #[arg(long)]
        announcements: bool,

        /// Skip earnings call transcripts
        #[arg(long)]
        no_transcripts: bool,

        /// Also include non-report forms (8-K, proxies, shelf filings)
        #[arg(long)]
        include_other_forms: bool,
    },
    /// Resume an interrupted run
    Resume,
    /// Show the current run's progress
    Status,
    /// Request cancellation of the current run
    Stop,
    /// Remove the session and its artifacts
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = FileSessionStore::with_config(config.session.clone());

    match command {
        Commands::Ask {
            question,
            entity,
            years,
            no_filings,
            announcements,
            no_transcripts,
            include_other_forms,
        } => {
            let mut query = RetrievalQuery::new(entity, years);
            query.sources = SourceToggles {
                filings: !no_filings,
                announcements,
                transcripts: !no_transcripts,
            };
            query.include_other_forms = include_other_forms;

            let controller = build_controller(config, store)?;
            let run = controller.start(question.join(" "), query)?;
            eprintln!("run {} started", run.id);

            drive(&controller).await
        }
        Commands::Resume => {
            if store.load()?.and_then(|s| s.run).is_none() {
                return Err("no run to resume; use 'filinglens ask' to start one".into());
            }
            let controller = build_controller(config, store)?;
            drive(&controller).await
        }
        Commands::Status => {
            let run = store.load()?.and_then(|s| s.run);
            match run {
                Some(run) => {
                    println!("Question: {}", run.question);
                    println!("Step:     {}", run.step.display_name());
                    if !run.documents.is_empty() {
                        println!(
                            "Progress: {}/{} documents",
                            run.completed,
                            run.documents.len()
                        );
                    }
                    if run.stop_requested {
                        println!("Stop requested.");
                    }
                    if !run.status.is_empty() {
                        println!("Recent activity:");
                        for entry in run.status.entries() {
                            println!("  {entry}");
                        }
                    }
                }
                None => println!("No run in flight."),
            }
            Ok(())
        }
        Commands::Stop => {
            if filinglens_core::session::request_stop(&store)? {
                println!("Stop requested; the run will halt at the next step.");
            } else {
                println!("No run in flight.");
            }
            Ok(())
        }
        Commands::Clear => {
            store.clear()?;
            println!("Session cleared.");
            Ok(())
        }
    }
}

fn build_controller(
    config: Config,
    store: FileSessionStore,
) -> Result<PipelineController<GeminiClient, FileSessionStore>, Box<dyn std::error::Error>> {
    let rotator = KeyRotator::new(config.model.api_keys_or_env())?;

    let model = GeminiClient::new(rotator.clone())
        .with_model(&config.model.model)
        .with_base_url(&config.model.base_url)
        .with_max_output_tokens(config.model.max_output_tokens);

    let classifier = GeminiClient::new(rotator)
        .with_model(&config.model.classifier_model)
        .with_base_url(&config.model.base_url);

    Ok(PipelineController::new(config, model, store).with_classifier(Box::new(classifier)))
}

/// Advances the pipeline step by step, rendering progress and streaming
/// the report as it is synthesized.
async fn drive(
    controller: &PipelineController<GeminiClient, FileSessionStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Ctrl-C sets the shared stop flag; the analysis worker notices at
    // its next poll tick and the step loop exits cleanly.
    let stop = controller.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstopping after the current step...");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamChunk>();
    let printer = tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            if chunk.is_final {
                break;
            }
            let _ = write!(out, "{}", chunk.text);
            let _ = out.flush();
        }
    });

    let mut bar: Option<ProgressBar> = None;

    loop {
        match controller.advance(Some(&tx)).await? {
            StepOutcome::Planned => eprintln!("plan ready"),
            StepOutcome::Retrieved {
                documents,
                from_cache,
            } => {
                let suffix = if from_cache { " (cached)" } else { "" };
                eprintln!("{documents} documents retrieved{suffix}");
            }
            StepOutcome::Expanded { documents } => {
                let pb = ProgressBar::new(documents as u64);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner} analyzing [{bar:30}] {pos}/{len} {msg}",
                    )?
                    .progress_chars("=> "),
                );
                bar = Some(pb);
            }
            StepOutcome::Analyzed {
                completed,
                total,
                failed,
            } => {
                if let Some(pb) = &bar {
                    pb.set_length(total as u64);
                    pb.set_position(completed as u64);
                    if failed {
                        pb.set_message("last document failed");
                    }
                }
            }
            StepOutcome::Finished { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                break;
            }
            StepOutcome::Stopped => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                eprintln!("run cancelled");
                break;
            }
        }
    }

    drop(tx);
    let _ = printer.await;
    println!();

    Ok(())
}
