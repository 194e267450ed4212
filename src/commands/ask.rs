//! Ask and chat commands
//!
//! Both render a fragment stream to the terminal as it arrives, paced per
//! mode, and flush after every fragment. `chat` keeps a [`ChatSession`]
//! across turns and understands a handful of slash commands.

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::llm::FragmentStream;
use crate::rag::{pace, Mode, RagEngine};
use crate::session::ChatSession;
use futures::StreamExt;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error};

/// Write every fragment as it arrives; returns the full text
pub async fn render_stream<W: Write>(mut stream: FragmentStream, out: &mut W) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        out.write_all(fragment.as_bytes())?;
        out.flush()?;
        text.push_str(&fragment);
    }
    writeln!(out)?;
    out.flush()?;
    Ok(text)
}

/// Answer one question in the session's mode
pub async fn cmd_ask<W: Write>(
    engine: &RagEngine,
    session: &ChatSession,
    question: &str,
    pacing: Duration,
    out: &mut W,
) -> Result<String> {
    let stream = engine.respond(session, question).await?;
    render_stream(pace(stream, pacing), out).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Empty,
    Quit,
    Reset,
    Help,
    ShowMode,
    SetMode(Mode),
    Unknown(String),
    Question(String),
}

fn parse_line(line: &str) -> ChatCommand {
    let line = line.trim();
    if line.is_empty() {
        return ChatCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatCommand::Question(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit"), _) => ChatCommand::Quit,
        (Some("reset"), _) => ChatCommand::Reset,
        (Some("help"), _) => ChatCommand::Help,
        (Some("mode"), None) => ChatCommand::ShowMode,
        (Some("mode"), Some(mode)) => match mode.parse() {
            Ok(mode) => ChatCommand::SetMode(mode),
            Err(_) => ChatCommand::Unknown(line.to_string()),
        },
        _ => ChatCommand::Unknown(line.to_string()),
    }
}

const HELP: &str = "Commands: /mode [rag|retrieval], /reset, /help, /quit";

/// Interactive loop over `input` until EOF or `/quit`.
///
/// A failed turn is reported and the loop continues; the session only
/// records turns whose stream completed.
pub async fn run_chat<R, W>(
    engine: &RagEngine,
    chat: &ChatConfig,
    session: &mut ChatSession,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "💬 pubmed-rag chat ({} mode). {}", session.mode(), HELP)?;
    let mut lines = input.lines();

    loop {
        write!(out, "\n> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_line(&line) {
            ChatCommand::Empty => continue,
            ChatCommand::Quit => break,
            ChatCommand::Help => writeln!(out, "{}", HELP)?,
            ChatCommand::Reset => {
                session.reset();
                writeln!(out, "History cleared.")?;
            }
            ChatCommand::ShowMode => writeln!(out, "Mode: {}", session.mode())?,
            ChatCommand::SetMode(mode) => {
                session.set_mode(mode);
                writeln!(out, "Mode: {}", mode)?;
            }
            ChatCommand::Unknown(command) => {
                writeln!(out, "Unknown command '{}'. {}", command, HELP)?
            }
            ChatCommand::Question(question) => {
                let pacing = chat.pacing(session.mode());
                match cmd_ask(engine, session, &question, pacing, out).await {
                    Ok(answer) => {
                        session.push_user(question);
                        session.push_assistant(answer);
                        debug!(
                            "Session {} has {} messages",
                            session.id(),
                            session.messages().len()
                        );
                    }
                    Err(e) => report_turn_error(&e, out)?,
                }
            }
        }
    }

    Ok(())
}

fn report_turn_error<W: Write>(e: &Error, out: &mut W) -> Result<()> {
    error!("{}", e);
    if e.is_transient() {
        writeln!(out, "\n⚠ {} (temporary failure, try again)", e)?;
    } else {
        writeln!(out, "\n✗ {}", e)?;
    }
    Ok(())
}
