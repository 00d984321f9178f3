use std::{fs, sync::Arc};

use anyhow::{Context, Result};

use summarion::{
    cli::args_from_env,
    config::Config,
    generation::{GenerationBackend, OpenAiCompatibleBackend},
    logging::init_tracing,
    modes::ModeOptions,
    pipeline::{SummarizeOptions, Summarizer},
    store::{FileStore, InMemoryStore, MemoryStore, StoreConfig},
    types::Message,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = args_from_env()?;
    let config = Config::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;
    let logging_guard = init_tracing(&config.logging).context("failed to initialize logging")?;

    let backend: Arc<dyn GenerationBackend> = Arc::new(
        OpenAiCompatibleBackend::new(config.generation.clone())
            .context("failed to construct generation backend")?,
    );
    let store: Arc<dyn MemoryStore> = match &config.store {
        StoreConfig::InMemory => Arc::new(InMemoryStore::new()),
        StoreConfig::File { root } => Arc::new(FileStore::new(root.clone())),
    };
    let summarizer = Summarizer::new(backend, store, config.summarizer_settings());

    let input = fs::read_to_string(&args.input_path)
        .with_context(|| format!("failed to read {}", args.input_path.display()))?;
    let messages: Vec<Message> = serde_json::from_str(&input)
        .with_context(|| format!("failed to parse messages from {}", args.input_path.display()))?;

    let options = SummarizeOptions {
        mode_options: ModeOptions {
            max_items: args.max_items,
            focus: args.focus.clone(),
            language: args.language.clone(),
        },
        refresh_canonical: args.refresh_canonical,
        ..SummarizeOptions::default()
    };

    tracing::info!(
        target: "main",
        run_id = %logging_guard.run_id(),
        namespace = %args.namespace,
        mode = %args.mode,
        messages = messages.len(),
        "summarize_requested"
    );
    let outcome = summarizer
        .summarize(messages, &args.mode, &args.namespace, &options)
        .await
        .context("summarize failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("failed to render outcome")?
    );
    if !outcome.failures.is_empty() || !outcome.finalize_errors.is_empty() {
        tracing::warn!(
            target: "main",
            failed_windows = outcome.failures.len(),
            finalize_errors = outcome.finalize_errors.len(),
            "summarize_completed_with_failures"
        );
    }

    Ok(())
}
