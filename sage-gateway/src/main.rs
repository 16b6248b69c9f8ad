use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sage_core::{Config, Secrets, Settings};
use sage_gateway::{AssistantContext, QueryOutcome, QueryRequest};
use sage_knowledge::KnowledgeIndex;

/// The single conversation driven from the terminal.
const CONSOLE_CONVERSATION: &str = "console";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sage_core::load_dotenv();
    let settings = Settings::load()?;

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.logging.level.as_str().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let secrets = Secrets::from_env(settings.generation_api_key_env());
    let config = Config::from_parts(secrets, settings)?;
    info!(
        "Configuration loaded ({}/{}, retrieval mode {})",
        config.provider(),
        config.model_id(),
        config.settings.retrieval.mode
    );

    let context = AssistantContext::from_config(config).await?;

    // Plain-text files named on the command line are indexed before the loop
    for path in std::env::args().skip(1) {
        index_file(&context.index, Path::new(&path)).await;
    }

    let (cancel_tx, cancel_rx) = mpsc::channel::<String>(8);
    let listener = context.orchestrator.spawn_cancel_listener(cancel_rx);

    let mode = context.config.settings.retrieval.mode;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        let ask = context.orchestrator.ask(QueryRequest::new(
            CONSOLE_CONVERSATION,
            question,
            mode,
        ));
        tokio::pin!(ask);

        let outcome = loop {
            tokio::select! {
                outcome = &mut ask => break outcome,
                _ = tokio::signal::ctrl_c() => {
                    if cancel_tx.send(CONSOLE_CONVERSATION.to_string()).await.is_err() {
                        warn!("cancel listener is gone");
                    }
                }
            }
        };
        print_outcome(&outcome);
    }

    drop(cancel_tx);
    let _ = listener.await;
    Ok(())
}

async fn index_file(index: &Arc<KnowledgeIndex>, path: &Path) {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read document");
            return;
        }
    };

    let source_id = path.display().to_string();
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_id.clone());

    match index.add_document(&text, &source_id, &label).await {
        Ok(ids) => info!(source_id = %source_id, chunks = ids.len(), "document indexed"),
        Err(err) => warn!(source_id = %source_id, error = %err, "failed to index document"),
    }
}

fn print_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::Answered { answer, sources } => {
            println!("{answer}");
            if !sources.is_empty() {
                println!("Sources: {}", sources.join(", "));
            }
        }
        QueryOutcome::NoContext => println!("Nothing relevant was found for this question."),
        QueryOutcome::Cancelled => println!("(cancelled)"),
        QueryOutcome::Failed { cause } => println!("Error: {cause}"),
    }
    println!();
}
