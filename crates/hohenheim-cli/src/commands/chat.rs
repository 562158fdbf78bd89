use std::io::Write;

use clap::Parser;
use hohenheim::assistant::RenderableResult;
use hohenheim::config::Config;
use hohenheim::reasoning::CancelSignal;
use hohenheim::session::SessionId;
use hohenheim::{Assistant, assistant::RenderedMemory};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::CliResult;
use crate::output::{OutputFormat, single_line, truncate_string};

#[derive(Parser)]
pub struct ChatCommand {
    #[clap(long, short, help = "Session ID to use (a new one is generated otherwise)")]
    pub session: Option<String>,
}

impl ChatCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        let session = match &self.session {
            Some(id) => SessionId::new(id.clone()).map_err(|e| e.to_string())?,
            None => SessionId::generate(),
        };

        eprintln!("Loading assistant (the embedding model may download on first run)...");
        let assistant = Assistant::from_config(config).await?;

        if format == OutputFormat::Table {
            println!("Hohenheim ready. Session {session}. Type 'help' for commands, 'exit' to quit.");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if format == OutputFormat::Table {
                print!("> ");
                std::io::stdout().flush()?;
            }

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let result = submit_interruptible(&assistant, &line, &session).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
                OutputFormat::Table => println!("{}", render(&result)),
            }

            if result.exit {
                break;
            }
        }

        Ok(())
    }
}

/// Submit one line; Ctrl+C aborts the in-flight backend call but the
/// exchange is still recorded.
async fn submit_interruptible(
    assistant: &Assistant,
    line: &str,
    session: &SessionId,
) -> RenderableResult {
    let cancel = CancelSignal::new();
    let submit = assistant.submit_with_cancel(line, session, &cancel);
    tokio::pin!(submit);

    tokio::select! {
        result = &mut submit => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            submit.await
        }
    }
}

/// Plain-text rendering of a reply for the terminal
pub fn render(result: &RenderableResult) -> String {
    let mut out = String::new();
    if !result.success {
        out.push_str("[!] ");
    }
    out.push_str(&result.message);

    let long_term: Vec<&RenderedMemory> = result
        .memories
        .iter()
        .filter(|m| m.score.is_some())
        .collect();
    if !long_term.is_empty() && result.intent != "memory-read" {
        out.push_str("\n\n  recalled:");
        for memory in long_term {
            out.push_str(&format!(
                "\n  - {} ({:.2})",
                truncate_string(&single_line(&memory.content), 70),
                memory.score.unwrap_or_default()
            ));
        }
    }

    let mut notes = Vec::new();
    if let Some(backend) = &result.backend {
        notes.push(format!("via {backend}"));
    }
    if result.unrestricted {
        notes.push("unrestricted".to_string());
    }
    if !result.long_term_available {
        notes.push("long-term memory unavailable".to_string());
    }
    if !notes.is_empty() {
        out.push_str(&format!("\n  ({})", notes.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hohenheim::memory::{ContextSource, RecordKind};

    fn result(message: &str) -> RenderableResult {
        RenderableResult {
            session_id: SessionId::new("test").unwrap(),
            intent: "reasoning-basic",
            message: message.to_string(),
            success: true,
            tier: None,
            backend: None,
            memories: Vec::new(),
            long_term_available: true,
            unrestricted: false,
            exit: false,
            patch: None,
        }
    }

    #[test]
    fn test_render_plain_message() {
        assert_eq!(render(&result("Hello.")), "Hello.");
    }

    #[test]
    fn test_render_failure_and_notes() {
        let mut r = result("No backend answered.");
        r.success = false;
        r.backend = Some("deepseek".to_string());
        r.long_term_available = false;

        let rendered = render(&r);
        assert!(rendered.starts_with("[!] No backend answered."));
        assert!(rendered.contains("via deepseek"));
        assert!(rendered.contains("long-term memory unavailable"));
    }

    #[test]
    fn test_render_lists_recalled_memories() {
        let mut r = result("You like tea.");
        r.memories.push(RenderedMemory {
            source: ContextSource::LongTerm,
            kind: RecordKind::Fact,
            content: "likes tea".to_string(),
            score: Some(0.87),
        });

        let rendered = render(&r);
        assert!(rendered.contains("recalled:"));
        assert!(rendered.contains("likes tea (0.87)"));
    }
}
