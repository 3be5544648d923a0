// ABOUTME: Interactive line-based chat loop.
// ABOUTME: Reads stdin and client events concurrently; slash commands inspect the session.

use std::io::Write;

use anyhow::Result;
use secretary_client::{ChatClient, ChatEvent, SessionError, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bridge::{ClientBridge, UiEvent};
use crate::render::{
    action_line, event_line, message_line, pending_prompt, pipeline_line, status_line,
};

const HELP: &str = "Commands: /events /pipeline /pending /history /reconnect /help /quit";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Quit,
    Reconnect,
    Events,
    Pipeline,
    Pending,
    History,
    Help,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Message(line.to_string());
        };
        match command.split_whitespace().next().unwrap_or_default() {
            "quit" | "exit" | "q" => Input::Quit,
            "reconnect" => Input::Reconnect,
            "events" => Input::Events,
            "pipeline" => Input::Pipeline,
            "pending" => Input::Pending,
            "history" => Input::History,
            "help" | "?" => Input::Help,
            _ => Input::Unknown(line.to_string()),
        }
    }
}

/// Run the interactive loop until `/quit` or end of input.
pub async fn run<T: Transport>(client: &ChatClient<T>) -> Result<()> {
    let mut events = ClientBridge::attach(client);
    println!("{}", HELP);

    // Failures show up as a status line through the bridge
    if let Err(e) = client.connect().await {
        tracing::warn!(error = %e, "initial connect failed");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut screen = Screen::default();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Quit => break,
                    input => handle_input(client, input).await,
                }
            }
            Some(event) = events.recv() => screen.handle_event(client, event),
        }
    }

    client.disconnect();
    Ok(())
}

async fn handle_input<T: Transport>(client: &ChatClient<T>, input: Input) {
    match input {
        Input::Empty | Input::Quit => {}
        Input::Message(text) => match client.send(&text) {
            Ok(()) => {}
            Err(SessionError::Busy) => {
                println!("Still answering the previous message, wait for it to finish.")
            }
            Err(SessionError::NotConnected) => {
                println!("Not connected. Use /reconnect to try again.")
            }
            Err(e) => println!("Send failed: {}", e),
        },
        Input::Reconnect => {
            if let Err(e) = client.reconnect().await {
                tracing::warn!(error = %e, "reconnect failed");
            }
        }
        Input::Events => {
            let events = client.events();
            if events.is_empty() {
                println!("No events yet.");
            }
            for event in &events {
                println!("  {}", event_line(event));
            }
        }
        Input::Pipeline => println!("{}", pipeline_line(&client.pipeline())),
        Input::Pending => match client.pending_request() {
            Some(pending) => println!("{}", pending_prompt(&pending)),
            None => println!("No open request."),
        },
        Input::History => {
            for message in client.messages() {
                println!("{}", message_line(&message));
            }
        }
        Input::Help => println!("{}", HELP),
        Input::Unknown(command) => println!("Unknown command {}. {}", command, HELP),
    }
}

/// Output state for the turn being printed
#[derive(Debug, Default)]
struct Screen {
    streamed: bool,
}

impl Screen {
    fn handle_event<T: Transport>(&mut self, client: &ChatClient<T>, event: UiEvent) {
        let mut stdout = std::io::stdout();
        match event {
            UiEvent::Token(text) => {
                self.streamed = true;
                print!("{}", text);
                stdout.flush().ok();
            }
            UiEvent::Streaming(true) => {
                self.streamed = false;
                print!("agent> ");
                stdout.flush().ok();
            }
            UiEvent::Streaming(false) => {
                let Some(reply) = client.messages().pop() else {
                    return;
                };
                // Replies delivered whole in the final payload were never echoed
                if !self.streamed {
                    print!("{}", reply.content);
                }
                println!();
                if let Some(error) = &reply.error {
                    println!("[interrupted: {}]", error);
                }
                for action in &reply.actions {
                    println!("{}", action_line(action));
                }
                if let Some(pending) = client.pending_request() {
                    println!("{}", pending_prompt(&pending));
                }
            }
            UiEvent::Status { status, error } => {
                println!("{}", status_line(status, error.as_deref()))
            }
            UiEvent::Event(ChatEvent::GuardrailBlocked { reason }) => {
                println!("\n[blocked by guardrail: {}]", reason)
            }
            UiEvent::Event(_)
            | UiEvent::MessagesChanged(_)
            | UiEvent::Pending(_)
            | UiEvent::Pipeline(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages() {
        assert_eq!(Input::parse("  book a flight "), Input::Message("book a flight".into()));
        assert_eq!(Input::parse(""), Input::Empty);
        assert_eq!(Input::parse("   \t"), Input::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/q"), Input::Quit);
        assert_eq!(Input::parse("/reconnect"), Input::Reconnect);
        assert_eq!(Input::parse("/events"), Input::Events);
        assert_eq!(Input::parse("/pipeline"), Input::Pipeline);
        assert_eq!(Input::parse("/pending"), Input::Pending);
        assert_eq!(Input::parse("/history"), Input::History);
        assert_eq!(Input::parse("/help extra words"), Input::Help);
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(Input::parse("/dance"), Input::Unknown("/dance".into()));
        assert_eq!(Input::parse("/"), Input::Unknown("/".into()));
    }
}
