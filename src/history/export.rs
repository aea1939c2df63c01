//! Markdown and JSON export of the conversation log

use super::CommittedSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No conversation to export")]
    Empty,
    #[error("Failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Human-readable name for a persona id; unknown ids read as the general user
pub fn persona_display_name(persona: &str) -> &'static str {
    match persona {
        "mike" => "Field Operator",
        "safeer" => "Safety Engineer",
        "sarah" => "Safety Manager",
        "david" => "Site Head",
        _ => "General User",
    }
}

/// Render the log as a Markdown document
pub fn to_markdown(
    entries: &[CommittedSession],
    persona: &str,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }

    let mut md = String::new();
    // Writing to a String cannot fail
    let _ = write!(
        md,
        "# Safety Copilot - Conversation Export\n\n---\n\n## Metadata\n\n\
         | Field | Value |\n|-------|-------|\n\
         | **Export Date** | {} |\n\
         | **Export Time** | {} |\n\
         | **Total Messages** | {} |\n\
         | **Persona** | {} |\n\n---\n\n",
        exported_at.format("%B %-d, %Y"),
        exported_at.format("%H:%M:%S UTC"),
        entries.len(),
        persona_display_name(persona),
    );

    for (index, entry) in entries.iter().enumerate() {
        let _ = write!(
            md,
            "## Message {}\n\n> **Timestamp:** {}  \n> **Dataset:** {}\n\n",
            index + 1,
            entry.committed_at.format("%b %-d, %Y, %H:%M"),
            entry.dataset,
        );
        let _ = write!(md, "### Question\n\n{}\n\n", entry.question.trim());

        if !entry.tool_calls.is_empty() {
            md.push_str("### Tool Calls\n\n");
            for call in &entry.tool_calls {
                let status = if call.is_pending() { "no result" } else { "done" };
                let _ = writeln!(md, "- `{}` ({status})", call.tool);
            }
            md.push('\n');
        }

        let answer = entry.answer_text.trim();
        let answer = if answer.is_empty() {
            "No analysis available"
        } else {
            answer
        };
        let _ = write!(md, "### Response\n\n{answer}\n\n");

        if let Some(error) = &entry.error {
            let _ = write!(md, "> **Error:** {error}\n\n");
        }
        md.push_str("---\n\n");
    }

    Ok(md)
}

#[derive(Serialize)]
struct JsonExport<'a> {
    exported_at: DateTime<Utc>,
    persona: &'a str,
    total_messages: usize,
    messages: &'a [CommittedSession],
}

/// Render the log as pretty-printed JSON
pub fn to_json(
    entries: &[CommittedSession],
    persona: &str,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }
    Ok(serde_json::to_string_pretty(&JsonExport {
        exported_at,
        persona: persona_display_name(persona),
        total_messages: entries.len(),
        messages: entries,
    })?)
}
