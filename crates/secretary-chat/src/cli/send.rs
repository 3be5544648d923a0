// ABOUTME: Non-interactive send command for scripting.
// ABOUTME: Streams response text to stdout, then prints actions and any clarification prompt.

use std::io::Write;

use anyhow::{anyhow, bail, Result};
use secretary_client::{ChatClient, Role, SessionSnapshot, Transport};

use crate::bridge::{ClientBridge, UiEvent};
use crate::render::{action_line, pending_prompt};

/// Run the send command. With `json`, tokens are not echoed and the final
/// snapshot is printed instead.
pub async fn run<T: Transport>(client: &ChatClient<T>, message: &str, json: bool) -> Result<()> {
    let mut events = ClientBridge::attach(client);

    client
        .connect()
        .await
        .map_err(|e| anyhow!("Failed to connect to agent service: {}", e))?;
    client
        .send(message)
        .map_err(|e| anyhow!("Failed to send message: {}", e))?;

    // Receive and print text until the turn settles
    let mut stdout = std::io::stdout();
    let mut streamed = false;
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::Token(text) if !json => {
                streamed = true;
                print!("{}", text);
                stdout.flush().ok();
            }
            UiEvent::Streaming(false) => break,
            _ => {}
        }
    }

    let snapshot = client.snapshot();
    client.disconnect();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_outcome(&snapshot, streamed);
    }

    match snapshot.messages.last().and_then(|m| m.error.as_deref()) {
        Some(error) => bail!("Turn failed: {}", error),
        None => Ok(()),
    }
}

fn print_outcome(snapshot: &SessionSnapshot, streamed: bool) {
    if let Some(reply) = snapshot
        .messages
        .last()
        .filter(|m| m.role == Role::Assistant)
    {
        // Replies that arrive whole in the final payload were never echoed
        if streamed {
            println!();
        } else if !reply.content.is_empty() {
            println!("{}", reply.content);
        }
        for action in &reply.actions {
            println!("{}", action_line(action));
        }
    }
    if let Some(pending) = &snapshot.pending_request {
        println!("{}", pending_prompt(pending));
    }
}
