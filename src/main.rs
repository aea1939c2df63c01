//! Safety Copilot - terminal client for the streaming analytics agent
//!
//! Reads questions from stdin, prints debounced answers to stdout. Logs go
//! to stderr as JSON.

use safety_copilot::history::export;
use safety_copilot::{
    start, ClientConfig, ClientEvent, ConversationLog, RenderFrame, RuntimeError, SessionHandle,
    SessionId, SqliteLogStore, WebSocketConnector,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safety_copilot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();

    tracing::info!(path = %config.db_path.display(), "Opening history database");
    let store = SqliteLogStore::open(&config.db_path)?;
    let log = ConversationLog::open(Arc::new(store)).await?;

    let ws_base = config.ws_base();
    tracing::info!(%ws_base, dataset = %config.dataset, model = %config.model, "Starting client");

    let handle = start(
        config.controller_context(),
        WebSocketConnector::new(ws_base),
        log,
        config.debounce_window,
    );

    tokio::spawn(print_frames(handle.frames()));
    tokio::spawn(print_events(handle.subscribe()));

    let mut dataset = config.dataset.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("", _) => {}
            ("/cancel", _) => handle.cancel().await?,
            ("/clear", _) => handle.clear_history().await?,
            ("/history", _) => print_history(&handle),
            ("/export", format) => export_log(&handle, &config.persona, format.trim()),
            ("/dataset", name) => {
                let name = name.trim();
                if safety_copilot::config::DATASETS.contains(&name) {
                    dataset = name.to_string();
                    println!("Dataset: {dataset}");
                } else {
                    println!(
                        "Unknown dataset {name:?}; expected one of {:?}",
                        safety_copilot::config::DATASETS
                    );
                }
            }
            _ => match handle.submit(line, &dataset).await {
                Ok(id) => tracing::debug!(session_id = %id, "Submitted"),
                Err(RuntimeError::Rejected(e)) => tracing::debug!(error = %e, "Ignored submission"),
                Err(e) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

/// Print answer text as it grows, one block per session
async fn print_frames(mut frames: watch::Receiver<RenderFrame>) {
    let mut current: Option<SessionId> = None;
    let mut printed = String::new();

    while frames.changed().await.is_ok() {
        let frame = frames.borrow_and_update().clone();
        if frame.is_idle() {
            continue;
        }
        if frame.session_id != current {
            current.clone_from(&frame.session_id);
            printed.clear();
        }

        match frame.answer_text.strip_prefix(printed.as_str()) {
            Some(delta) => print!("{delta}"),
            None => print!("\n{}", frame.answer_text),
        }
        if !frame.streaming && !frame.answer_text.is_empty() {
            println!();
        }
        let _ = std::io::stdout().flush();
        printed = frame.answer_text;
    }
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::SessionStarted { question, .. }) => println!("> {question}"),
            Ok(ClientEvent::Committed { entry }) => {
                println!("[saved: {} tool calls]", entry.tool_calls.len());
            }
            Ok(ClientEvent::Notice { notice }) => {
                println!("! {}: {}", notice.title, notice.description);
            }
            Ok(ClientEvent::HistoryCleared) => println!("[history cleared]"),
            Ok(ClientEvent::Error { message }) => println!("! {message}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_history(handle: &SessionHandle) {
    let entries = handle.log().entries();
    if entries.is_empty() {
        println!("[no history]");
    }
    for (index, entry) in entries.iter().enumerate() {
        println!(
            "{}. [{}] {} -> {}",
            index + 1,
            entry.dataset,
            entry.question,
            entry.answer_text.lines().next().unwrap_or("")
        );
    }
}

fn export_log(handle: &SessionHandle, persona: &str, format: &str) {
    let entries = handle.log().entries();
    let now = chrono::Utc::now();
    let exported = match format {
        "json" => export::to_json(&entries, persona, now),
        "" | "md" | "markdown" => export::to_markdown(&entries, persona, now),
        other => {
            println!("Unknown export format {other:?}; use md or json");
            return;
        }
    };
    match exported {
        Ok(text) => println!("{text}"),
        Err(e) => println!("! Export failed: {e}"),
    }
}
