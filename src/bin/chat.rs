//! Interactive terminal chat against a turn endpoint.
//!
//! ```text
//! TURNSTREAM_ENDPOINT=http://localhost:3000/api/turn_response cargo run --bin turnstream-chat
//! ```
//!
//! Commands: `/persona <id>`, `/personas`, `/reset`, `/quit`. Ctrl-C interrupts
//! the running turn.

use anyhow::{Context, Result, bail};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use turnstream::{
    ChatOptions, ChatSession, Item, Persona, ToolRegistry, ToolStatus, get_api_key, get_endpoint,
    tool,
};

fn personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "guide",
            "Guide",
            "You are a friendly travel guide. Keep answers short and concrete.",
        ),
        Persona::new(
            "critic",
            "Critic",
            "You are a blunt food critic. Answer in two sentences at most.",
        ),
    ]
}

fn registry() -> ToolRegistry {
    let clock = tool("current_time", "Seconds since the Unix epoch").build(|_| async {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| turnstream::Error::tool(e.to_string()))?;
        Ok(json!({"unix_seconds": now.as_secs()}))
    });
    ToolRegistry::new().with_tool(clock).with_web_search()
}

fn print_new_items(items: &[Item], speaker: &str) {
    for item in items {
        match item {
            Item::Message(msg) if msg.role == turnstream::Role::Assistant => {
                println!("{}: {}", speaker, msg.text());
            }
            Item::Message(_) => {}
            Item::ToolCall(call) => {
                let name = call.name.as_deref().unwrap_or("search");
                let status = match call.status {
                    ToolStatus::InProgress => "in progress",
                    ToolStatus::Searching => "searching",
                    ToolStatus::Completed => "done",
                    ToolStatus::Failed => "failed",
                };
                println!("  [{} {}]", name, status);
            }
        }
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush().context("flushing stdout")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut builder = ChatOptions::builder()
        .endpoint(get_endpoint(None))
        .personas(personas());
    if let Some(key) = get_api_key() {
        builder = builder.api_key(key);
    }
    let options = builder.build()?;

    let Some(first) = options.personas.first().map(|p| p.id.clone()) else {
        bail!("no personas configured");
    };
    println!("turnstream chat on {} (persona: {})", options.endpoint, first);

    let session = ChatSession::connect(options, Arc::new(registry()))?;
    session.select_persona(&first).await?;
    let mut persona = first;

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    prompt()?;
    while let Some(line) = lines.next().await {
        let line = line.context("reading stdin")?;
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("", _) => {}
            ("/quit", _) => break,
            ("/personas", _) => {
                for p in &session.options().personas {
                    let marker = if p.id == persona { "*" } else { " " };
                    println!("{} {} ({})", marker, p.id, p.name);
                }
            }
            ("/persona", id) => match session.select_persona(id).await {
                Ok(()) => {
                    persona = id.to_string();
                    println!("now talking to {}", persona);
                }
                Err(e) => println!("error: {}", e),
            },
            ("/reset", _) => {
                session.clear_conversation(&persona).await?;
                println!("conversation with {} cleared", persona);
            }
            _ => {
                let before = session.state(&persona).await?.chat_messages.len();

                let send = session.send_user_message(&persona, line);
                tokio::pin!(send);
                let outcome = tokio::select! {
                    outcome = &mut send => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        session.interrupt(&persona).await;
                        send.await
                    }
                };

                let state = session.state(&persona).await?;
                let speaker = session
                    .options()
                    .persona(&persona)
                    .map_or(persona.as_str(), |p| p.name.as_str());
                print_new_items(state.chat_messages.get(before..).unwrap_or_default(), speaker);

                match outcome {
                    Ok(summary) if summary.truncated => {
                        println!("(stopped after {} turns)", summary.turns)
                    }
                    Ok(_) => {}
                    Err(e) => println!("error: {}", e),
                }
            }
        }
        prompt()?;
    }

    Ok(())
}
