use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sales_roleplay::{
    ai::PipeConversation,
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    session::{
        SessionConfig, SessionDeps, SessionEvent, SessionOrchestrator, SessionState, SystemClock,
    },
    speech::{ChannelCapture, ElevenLabsSynthesizer, FileSink, SpeechAdapter},
    storage::{ClientPersona, Evaluation, InteractionMode, Scenario, Sender, SqliteStorage},
    EndOutcome, TurnOutcome,
};

/// Practice a sales conversation against a simulated client.
#[derive(Parser, Debug)]
#[command(name = "sales-roleplay", version, about)]
struct Cli {
    /// Interaction mode: chat or call
    #[arg(long, default_value = "chat")]
    mode: InteractionMode,

    #[arg(long, default_value = "local-trainee")]
    user: String,

    #[arg(long, default_value = "cold-call")]
    scenario_id: String,

    #[arg(long, default_value = "Cold call")]
    title: String,

    #[arg(
        long,
        default_value = "You call a small business owner who did not ask to be contacted."
    )]
    description: String,

    /// Behavioral instructions for the simulated client
    #[arg(long, default_value = "Be busy and hard to convince. Ask about price early.")]
    instructions: String,

    /// Emotional stance of the client
    #[arg(long, default_value = "skeptical")]
    emotion: String,

    /// Voice used for synthesis in call mode
    #[arg(long)]
    voice_id: Option<String>,

    /// Where synthesized replies are written in call mode
    #[arg(long, default_value = "./data/audio")]
    audio_dir: PathBuf,

    /// Do not create or update the Langbase pipes at startup
    #[arg(long)]
    skip_pipe_setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Sales roleplay starting");

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    let pipes = Arc::new(PipeConversation::new(langbase, &config.pipes));
    if !cli.skip_pipe_setup {
        info!("Ensuring Langbase pipes exist...");
        if let Err(e) = pipes.ensure_pipes().await {
            error!(error = %e, "Failed to ensure pipes exist");
            return Err(e.into());
        }
    }

    let capture = ChannelCapture::new();
    let feeder = capture.feeder();
    let synthesizer = ElevenLabsSynthesizer::from_config(&config.speech, &config.request)?;
    let speech = match (cli.mode, synthesizer) {
        (InteractionMode::Call, Some(synth)) => SpeechAdapter::voice(
            Arc::new(capture),
            Arc::new(synth),
            Arc::new(FileSink::new(&cli.audio_dir)),
        ),
        (InteractionMode::Call, None) => {
            warn!("ELEVENLABS_API_KEY is not set, call mode runs without audio");
            SpeechAdapter::silent()
        }
        (InteractionMode::Chat, _) => SpeechAdapter::silent(),
    };

    let session_config = SessionConfig {
        user_id: cli.user,
        scenario: Scenario {
            id: cli.scenario_id,
            title: cli.title,
            description: cli.description,
            instructions: cli.instructions,
        },
        mode: cli.mode,
        persona: ClientPersona {
            emotion: cli.emotion,
            voice_id: cli.voice_id,
        },
    };

    let orchestrator = Arc::new(SessionOrchestrator::new(
        session_config,
        config.session.clone(),
        SessionDeps {
            replies: pipes.clone(),
            scorer: pipes,
            storage,
            speech: Arc::new(speech),
            clock: Arc::new(SystemClock),
        },
    ));

    let printer = tokio::spawn(print_events(orchestrator.subscribe(), orchestrator.is_voice()));
    orchestrator.spawn_capture_loop();

    println!("Commands: /pause  /resume  /mic  /end");
    orchestrator.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim().to_string();
        match input.as_str() {
            "/end" => break,
            "/pause" => {
                if let Err(e) = orchestrator.pause().await {
                    println!("Cannot pause now ({})", e);
                }
            }
            "/resume" => {
                let session = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if let Err(e) = session.resume().await {
                        println!("Cannot resume now ({})", e);
                    }
                });
            }
            "/mic" => {
                if !orchestrator.retry_capture().await {
                    println!("Microphone is not listening");
                }
            }
            _ if orchestrator.is_voice() => {
                // Lines stand in for recognized speech.
                if !feeder.finalize(input.clone()) {
                    println!("(the client is talking, wait a moment)");
                }
            }
            _ => {
                let session = Arc::clone(&orchestrator);
                let text = input.clone();
                tokio::spawn(async move {
                    if let TurnOutcome::Busy { state } = session.handle_user_turn(&text).await {
                        if state != SessionState::Ended {
                            println!("(the client is still answering)");
                        }
                    }
                });
            }
        }
    }

    match orchestrator.end().await {
        EndOutcome::TooShort { turns } => {
            println!(
                "Session too short to evaluate ({} turns). Talk a bit more next time.",
                turns
            );
        }
        EndOutcome::Evaluated { evaluation } => print_evaluation(&evaluation),
        EndOutcome::AlreadyEnded { .. } => {}
    }

    printer.abort();
    info!("Session closed");
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>, voice: bool) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::TurnAppended { turn }) => match turn.sender {
                Sender::Agent => println!("{}: {}", turn.sender.label(), turn.text),
                Sender::User if voice => println!("{}: {}", turn.sender.label(), turn.text),
                Sender::User => {}
            },
            Ok(SessionEvent::StateChanged {
                to: SessionState::Paused,
                ..
            }) => println!("(paused)"),
            Ok(SessionEvent::MetricsUpdated { snapshot }) => {
                println!("  [overall {} {}]", snapshot.overall, snapshot.trend);
            }
            Ok(SessionEvent::Warning { warning }) => println!("! {}", warning),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    println!();
    println!("Overall  {:>3}", evaluation.overall);
    println!("Rapport  {:>3}", evaluation.rapport);
    println!("Clarity  {:>3}", evaluation.clarity);
    println!("Empathy  {:>3}", evaluation.empathy);
    println!("Accuracy {:>3}", evaluation.accuracy);

    if !evaluation.strengths.is_empty() {
        println!("\nStrengths:");
        for item in &evaluation.strengths {
            println!("  - {}", item);
        }
    }
    if !evaluation.improvements.is_empty() {
        println!("\nTo improve:");
        for item in &evaluation.improvements {
            println!("  - {}", item);
        }
    }
    println!("\n{}", evaluation.feedback);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
