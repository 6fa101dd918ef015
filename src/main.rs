use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neurochat::integration::{AppConfig, SpeechRequest, TurnOrchestrator, TurnRequest};
use neurochat::models::catalog::list_entries;
use neurochat::models::Capability;
use neurochat::session::{SessionHandle, SessionStore};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "neurochat", about = "NeuroChat - one multimodal chat turn at a time")]
struct CliArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory relative paths in the configuration are resolved against
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one turn and append it to a session
    Turn {
        /// Text model identifier
        #[arg(long)]
        model: String,

        /// Typed prompt
        #[arg(long, default_value = "")]
        prompt: String,

        /// WAV clip to transcribe instead of a typed prompt
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Avatar file name
        #[arg(long)]
        avatar: Option<String>,

        /// Speak the reply
        #[arg(long)]
        speak: bool,

        /// Reference voice file name
        #[arg(long)]
        voice: Option<String>,

        /// Language of the spoken reply
        #[arg(long, default_value = "en")]
        language: String,

        /// Session file; read if present, written after the turn
        #[arg(long)]
        session: Option<PathBuf>,
    },

    /// List installed models, avatars and voices
    List,

    /// Print the transcript of a session
    History {
        /// Session file written by `turn`
        #[arg(long)]
        session: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neurochat=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(root) = &args.root {
        config = config.with_root(root);
    }

    match args.command {
        Command::Turn {
            model,
            prompt,
            audio,
            avatar,
            speak,
            voice,
            language,
            session,
        } => {
            let previous = match &session {
                Some(path) if path.exists() => Some(SessionHandle::load(path)?),
                _ => None,
            };

            let mut request = match audio {
                Some(clip) => TurnRequest::voice(model, clip),
                None => TurnRequest::text(model, prompt),
            }
            .in_session(previous);
            if let Some(avatar) = avatar {
                request = request.with_avatar(avatar);
            }
            if speak {
                let mut speech = SpeechRequest::new(language);
                if let Some(voice) = voice {
                    speech = speech.with_voice(voice);
                }
                request = request.with_speech(speech);
            }

            let orchestrator = TurnOrchestrator::from_config(config)?;
            let result = orchestrator.run_turn(request);

            // Keep a session created by a turn that failed while writing
            if let (Some(path), Some(handle)) = (&session, orchestrator.last_session()) {
                handle
                    .save(path)
                    .with_context(|| format!("Failed to write session file {:?}", path))?;
            }
            let outcome = result?;

            println!("Human: {}", outcome.prompt);
            println!("AI: {}", outcome.reply);
            if let Some(path) = &outcome.avatar_path {
                println!("Avatar: {}", path.display());
            }
            if let Some(path) = &outcome.audio_path {
                println!("Audio: {}", path.display());
            }
            if let Some(e) = &outcome.speech_error {
                println!("Speech unavailable: {}", e.user_message());
            }
            println!("Session: {}", outcome.session.root().display());
            info!("{}", outcome.timings.summary());
        }
        Command::List => {
            let catalog = config.catalog();
            for capability in [
                Capability::TextGeneration,
                Capability::Transcription,
                Capability::SpeechSynthesis,
            ] {
                print_entries(capability.as_str(), catalog.root_for(capability))?;
            }
            print_entries("avatars", &config.paths.avatars_dir)?;
            print_entries("voices", &config.paths.voices_dir)?;
        }
        Command::History { session } => {
            let handle = SessionHandle::load(&session)?;
            let store = SessionStore::new(&config.paths.outputs_dir);
            for record in store.read_transcript(&handle)? {
                print!("{}", record.render());
            }
        }
    }

    Ok(())
}

fn print_entries(label: &str, dir: &Path) -> Result<()> {
    println!("{} ({}):", label, dir.display());
    if !dir.is_dir() {
        println!("  (missing)");
        return Ok(());
    }
    for name in list_entries(dir)? {
        println!("  {}", name);
    }
    Ok(())
}
