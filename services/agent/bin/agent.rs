//! Main Entrypoint for the Concierge Agent
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Loading the grounding documents and composing the system instruction.
//! 3. Wiring the language model and the console transport into a session.
//! 4. Running the session until it ends or the process is interrupted.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use concierge_agent::{
    config::Config,
    console::{ConsoleRoom, ConsoleSpeaker, ConsoleTranscriber, SilenceGate},
};
use concierge_core::{
    Capabilities, SessionController,
    context::load_context,
    instructions::InstructionComposer,
    llm_client::OpenAICompatibleClient,
};
use secrecy::ExposeSecret;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Voice agent that only answers from a directory of documents.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Directory holding the grounding documents (overrides CONTEXT_DIR).
    #[arg(long)]
    context_dir: Option<PathBuf>,
    /// Only load documents whose file name contains this text (overrides CONTEXT_TOPIC).
    #[arg(long)]
    topic: Option<String>,
    /// Print the composed system instruction and exit.
    #[arg(long)]
    print_instructions: bool,
}

/// Listens for the `Ctrl+C` signal to end the session gracefully.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Ending session...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr; stdout is the agent's voice.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Loading grounding context...");

    // --- 3. Compose the System Instruction ---
    let context_dir = cli.context_dir.unwrap_or_else(|| config.context_dir.clone());
    let topic = cli.topic.or_else(|| config.context_topic.clone());
    let corpus = load_context(&context_dir, topic.as_deref())?;
    let instruction = InstructionComposer::new(config.agent_role.as_str()).compose(&corpus);

    if cli.print_instructions {
        println!("{}", instruction);
        return Ok(());
    }

    // --- 4. Initialize Capabilities ---
    let api_key = config.api_key().context("A model API key is required to start a session")?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key.expose_secret())
        .with_api_base(&config.llm_base_url);
    let capabilities = Capabilities {
        stt: Arc::new(ConsoleTranscriber::stdin(Arc::new(SilenceGate))),
        tts: Arc::new(ConsoleSpeaker::stdout()),
        llm: Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.chat_model.clone(),
        )),
        room: Arc::new(ConsoleRoom),
    };

    // --- 5. Run the Session ---
    info!(
        model = %config.chat_model,
        base_url = %config.llm_base_url,
        context_dir = %context_dir.display(),
        "Agent configured. Starting session..."
    );
    let controller = Arc::new(SessionController::new(
        instruction,
        capabilities,
        config.session_config(),
    ));

    let signal_controller = controller.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        signal_controller.shutdown().await;
    });

    let summary = controller.run().await;
    signal_task.abort();

    info!(
        summary = %serde_json::to_string(&summary)?,
        "Session has ended."
    );
    Ok(())
}
