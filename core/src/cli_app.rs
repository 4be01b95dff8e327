use crate::chat_types::{ClientEvent, Conversation, Message};
use crate::config::Config;
use crate::coordinator::SendOutcome;
use crate::error::ChatError;
use crate::fake_gateway::FakeGateway;
use crate::timeline::{relative_label, show_divider};
use crate::ChatClient;
use chrono::{Duration, Utc};
use colored::*;
use std::sync::Arc;

/// Shared CLI implementation for the `parley` binary.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("parley")
        .to_string();

    let (config, rest) = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let Some(command) = rest.first() else {
        print_usage(&bin);
        return Ok(());
    };

    match command.as_str() {
        "conversations" => {
            let client = connect(config)?;
            list_conversations(&client).await?;
        }
        "history" => {
            let Some(id) = rest.get(1) else {
                eprintln!("{}", format!("Usage: {} history <conversation_id>", bin).yellow());
                return Ok(());
            };
            let client = connect(config)?;
            show_history(&client, id).await?;
        }
        "send" => {
            if rest.len() < 3 {
                eprintln!("{}", format!("Usage: {} send <conversation_id> <message>", bin).yellow());
                return Ok(());
            }
            let client = connect(config)?;
            send_message(&client, &rest[1], &rest[2..].join(" ")).await?;
        }
        "profile" => {
            let Some(id) = rest.get(1) else {
                eprintln!("{}", format!("Usage: {} profile <user_id>", bin).yellow());
                return Ok(());
            };
            let client = connect(config)?;
            show_profile(&client, id).await?;
        }
        "demo" => {
            demo(config).await?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "💬 Parley".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} [flags] <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                 List conversations, latest first", "conversations".cyan());
    println!("  {} <id>                  Show a conversation", "history".cyan());
    println!("  {} <id> <message>           Send a message", "send".cyan());
    println!("  {} <user_id>             Show a user profile", "profile".cyan());
    println!("  {}                          Offline walkthrough of an optimistic send", "demo".cyan());
    println!();
    println!("{}", "Flags:".bright_white().bold());
    println!("  {} <url>  {} <id>  {} <n>", "--base-url".cyan(), "--user".cyan(), "--concurrency".cyan());
    println!("  {} <ms>  {} <path>  {}", "--timeout-ms".cyan(), "--config".cyan(), "--offline".cyan());
}

fn connect(config: Config) -> anyhow::Result<ChatClient> {
    if config.offline {
        return Ok(ChatClient::new(config, Arc::new(sample_gateway())));
    }
    ChatClient::with_http(config).map_err(|e| anyhow::anyhow!("Cannot reach backend: {}", e))
}

async fn list_conversations(client: &ChatClient) -> anyhow::Result<()> {
    let loaded = client.load_chat_list().await?;
    let rows = client.chat_list().await;
    if rows.is_empty() {
        println!("{}", "No conversations".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Conversations ({}, {} previews)", rows.len(), loaded)
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    let now = Utc::now();
    for row in rows {
        let name = if row.blocked {
            format!("{} (blocked)", row.conversation.name).red()
        } else {
            row.conversation.name.bright_white()
        };
        match row.latest {
            Some(latest) => println!(
                "  {} {}  {}  {}",
                row.conversation.id.cyan(),
                name,
                latest.text.dimmed(),
                relative_label(latest.created_at, now).green()
            ),
            None => println!("  {} {}  {}", row.conversation.id.cyan(), name, "no messages".dimmed()),
        }
    }
    Ok(())
}

async fn show_history(client: &ChatClient, conversation_id: &str) -> anyhow::Result<()> {
    client.refresh_messages(conversation_id).await?;
    let view = client.observe_messages(conversation_id).await;
    if view.messages.is_empty() {
        println!("{}", "No messages yet".yellow());
        return Ok(());
    }
    print_messages(&view.messages, &client.config().local_user_id);
    Ok(())
}

fn print_messages(messages: &[Message], local_user_id: &str) {
    let now = Utc::now();
    let mut prev: Option<&Message> = None;
    for message in messages {
        if show_divider(prev, message) {
            println!("{}", format!("── {} ──", relative_label(message.created_at, now)).dimmed());
        }
        let who = if message.sender_id == local_user_id {
            "me".green().bold()
        } else {
            message.sender_id.cyan()
        };
        let pending = if message.is_temporary() { " (sending)".yellow() } else { "".normal() };
        println!("  {}: {}{}", who, message.text, pending);
        prev = Some(message);
    }
}

async fn send_message(client: &ChatClient, conversation_id: &str, text: &str) -> anyhow::Result<()> {
    match client.send_and_wait(conversation_id, text).await? {
        None => println!("{}", "Nothing to send".yellow()),
        Some(outcome) => report_outcome(&outcome)?,
    }
    Ok(())
}

fn report_outcome(outcome: &SendOutcome) -> anyhow::Result<()> {
    match outcome {
        SendOutcome::Confirmed { confirmed_id, .. } => {
            println!("{} Message sent! ID: {}", "✓".green().bold(), confirmed_id.cyan());
        }
        SendOutcome::Orphaned { server_id, .. } => {
            println!(
                "{} Message sent as {}, local copy was already gone",
                "!".yellow().bold(),
                server_id.cyan()
            );
        }
        SendOutcome::RolledBack { error, .. } => {
            eprintln!("{} Error: {}", "✗".red().bold(), error.to_string().red());
            if let Some(hint) = retry_hint(error) {
                eprintln!("  {} {}", "-".dimmed(), hint.yellow());
            }
            anyhow::bail!("send failed");
        }
    }
    Ok(())
}

fn retry_hint(error: &ChatError) -> Option<&'static str> {
    if error.is_retryable() {
        Some("The message was not delivered, try sending it again")
    } else {
        None
    }
}

async fn show_profile(client: &ChatClient, user_id: &str) -> anyhow::Result<()> {
    let user = client.profile(user_id).await?;
    println!(
        "{}",
        "╭─ Profile ─────────────────────────────────────────────────────╮".bright_cyan()
    );
    println!("{} {}", "│".bright_cyan(), format!("Name:  {}", user.name.cyan()).bright_white());
    println!("{} {}", "│".bright_cyan(), format!("Id:    {}", user.id).bright_white());
    if !user.email.is_empty() {
        println!("{} {}", "│".bright_cyan(), format!("Email: {}", user.email).bright_white());
    }
    if !user.phone.is_empty() {
        println!("{} {}", "│".bright_cyan(), format!("Phone: {}", user.phone).bright_white());
    }
    println!(
        "{}",
        "╰───────────────────────────────────────────────────────────────╯".bright_cyan()
    );
    Ok(())
}

/// One confirmed and one rolled-back send against the in-memory backend
async fn demo(config: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(sample_gateway().with_held_sends());
    let client = ChatClient::new(config, gateway.clone());
    let mut events = client.subscribe();
    let me = client.config().local_user_id.clone();

    client.refresh_messages("1").await?;
    println!("{}", "Before sending:".bright_white().bold());
    print_messages(&client.observe_messages("1").await.messages, &me);

    let Some(ticket) = client.send("1", "On my way!").await? else {
        return Ok(());
    };
    println!();
    println!("{}", "Optimistic (server has not answered):".bright_white().bold());
    print_messages(&client.observe_messages("1").await.messages, &me);

    gateway.release_sends(1);
    report_outcome(&ticket.outcome().await?)?;
    print_messages(&client.observe_messages("1").await.messages, &me);

    println!();
    println!("{}", "Now with the network down:".bright_white().bold());
    gateway
        .fail_next_sends(vec![ChatError::Network("connection reset".into())])
        .await;
    if let Some(ticket) = client.send("1", "This one gets lost").await? {
        print_messages(&client.observe_messages("1").await.messages, &me);
        gateway.release_sends(1);
        if let SendOutcome::RolledBack { error, .. } = ticket.outcome().await? {
            println!("{} Rolled back: {}", "↺".yellow().bold(), error.to_string().red());
        }
    }
    print_messages(&client.observe_messages("1").await.messages, &me);
    if let Some(latest) = client.observe_latest("1").await {
        println!("{} {}", "Preview:".dimmed(), latest.text);
    }

    while let Ok(event) = events.try_recv() {
        if let ClientEvent::SendFailed { temp_id, .. } = event {
            println!("{} {}", "Event: send failed for".dimmed(), temp_id.dimmed());
        }
    }
    Ok(())
}

fn sample_gateway() -> FakeGateway {
    let now = Utc::now();
    let people = [
        ("1", "Ada Lovelace", "ada@example.com"),
        ("2", "Grace Hopper", "grace@example.com"),
        ("3", "Alan Turing", "alan@example.com"),
    ];
    let conversations = people
        .iter()
        .map(|(id, name, email)| Conversation {
            id: id.to_string(),
            name: name.to_string(),
            avatar: String::new(),
            phone: String::new(),
            email: email.to_string(),
        })
        .collect();
    let messages = vec![
        sample_message("1", "11", "Are we still on for tonight?", now - Duration::hours(2)),
        sample_message("1", "12", "Dinner at eight", now - Duration::minutes(3)),
        sample_message("2", "21", "Found the bug, it was a moth", now - Duration::days(1)),
    ];
    FakeGateway::with_data(conversations, messages)
}

fn sample_message(conversation_id: &str, id: &str, text: &str, at: chrono::DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: conversation_id.to_string(),
        text: text.to_string(),
        created_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_hint_only_for_transient_failures() {
        assert!(retry_hint(&ChatError::Network("connection reset".into())).is_some());
        assert!(retry_hint(&ChatError::Validation("Missing field: body".into())).is_none());
        assert!(report_outcome(&SendOutcome::RolledBack {
            temp_id: "temp-1-abcdefg".into(),
            error: ChatError::Network("timeout".into()),
        })
        .is_err());
    }
}
