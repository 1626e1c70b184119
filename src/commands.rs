//! Non-interactive subcommands

use anyhow::{bail, Result};
use std::io::{self, Write};
use std::path::Path;

use crate::config::Config;
use crate::session::ChatSession;
use crate::streaming::TurnState;
use crate::thread::{Role, Thread, ThreadId};

pub fn list_threads(session: &ChatSession) -> Result<()> {
    let threads = session.threads();
    if threads.is_empty() {
        println!("No history yet. Run 'lumina' to start your first chat!");
        return Ok(());
    }

    println!("Recent Chats:");
    println!("{}", "=".repeat(50));

    for (index, thread) in threads.iter().enumerate() {
        println!("{:>2}. {}", index + 1, thread.display_title());
        println!(
            "    {}  {} messages  updated {}",
            thread.id.short(),
            thread.message_count(),
            thread.updated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

pub fn show_thread(session: &ChatSession, query: &str) -> Result<()> {
    let id = session.resolve_id(query)?;
    let Some(thread) = session.store().thread(&id) else {
        bail!("Chat '{}' not found", query);
    };

    print_transcript(thread);
    Ok(())
}

fn print_transcript(thread: &Thread) {
    println!("{}", thread.display_title());
    println!("{}", "=".repeat(50));

    if thread.messages.is_empty() {
        println!("(no messages)");
        return;
    }

    for message in &thread.messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Lumina",
        };
        println!(
            "{} · {}",
            speaker,
            message.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
        println!("{}", message.content);
        println!();
    }
}

/// Send one message and print the reply as it streams in
pub async fn ask(session: &mut ChatSession, text: &str, thread: Option<&str>) -> Result<()> {
    if let Some(query) = thread {
        let id = session.resolve_id(query)?;
        session.select_thread(&id);
    } else {
        session.create_thread();
    }

    let thread_id = session.begin_submit(text).await?;
    let mut printed = String::new();
    let mut stdout = io::stdout();

    loop {
        let finished = session.next_update(&thread_id).await?;
        if let Some(content) = reply_content(session, &thread_id) {
            match content.strip_prefix(printed.as_str()) {
                Some(suffix) if !suffix.is_empty() => {
                    write!(stdout, "{}", suffix)?;
                    stdout.flush()?;
                    printed = content;
                }
                Some(_) => {}
                None => {
                    writeln!(stdout)?;
                    write!(stdout, "{}", content)?;
                    printed = content;
                }
            }
        }

        if let Some(outcome) = finished {
            writeln!(stdout)?;
            if outcome.state == TurnState::Failed {
                bail!(
                    "Reply failed: {}",
                    outcome.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            return Ok(());
        }
    }
}

fn reply_content(session: &ChatSession, thread_id: &ThreadId) -> Option<String> {
    session
        .store()
        .thread(thread_id)?
        .last_message()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.clone())
}

pub fn delete_thread(session: &mut ChatSession, query: &str) -> Result<()> {
    let id = session.resolve_id(query)?;
    let title = session
        .store()
        .thread(&id)
        .map(|t| t.display_title().to_string())
        .unwrap_or_default();

    session.delete_thread(&id);
    println!("Deleted chat: {}", title);
    Ok(())
}

pub fn show_config(config: &Config, path: &Path) -> Result<()> {
    println!("Lumina configuration");
    println!("{}", "=".repeat(50));
    println!("Config file:  {}", path.display());
    println!("Provider:     {}", config.provider);
    println!("Model:        {}", config.model());
    println!("Endpoint:     {}", config.base_url());
    println!("API key:      {}", config.masked_api_key());
    if let Some(temperature) = config.temperature {
        println!("Temperature:  {}", temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        println!("Max tokens:   {}", max_tokens);
    }
    println!("Timeout:      {}s", config.request_timeout_secs);
    println!("Data dir:     {}", config.data_dir.display());
    println!("Log file:     {}", config.log_path().display());
    Ok(())
}
