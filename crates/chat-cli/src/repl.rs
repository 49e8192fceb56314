//! Interactive loop

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use chat_core::{ChatError, Orchestrator};

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Message(&'a str),
    Clear,
    Tools,
    Quit,
    Unknown(&'a str),
    Empty,
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/clear" => Self::Clear,
            "/tools" => Self::Tools,
            "/quit" | "/exit" => Self::Quit,
            cmd if cmd.starts_with('/') => Self::Unknown(cmd),
            text => Self::Message(text),
        }
    }
}

pub async fn run(mut chat: Orchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match Input::parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                let title = chat.session().title();
                chat.reset();
                println!("Closed \"{}\". Started a new conversation.", title);
            }
            Input::Tools => {
                let tools = chat.tools();
                if tools.is_empty() {
                    println!("No tools registered.");
                }
                for def in tools.definitions() {
                    println!("  {} - {}", def.name, def.description);
                }
            }
            Input::Unknown(cmd) => println!("Unknown command {}. Try /tools, /clear or /quit.", cmd),
            Input::Message(text) => {
                let cancel = CancellationToken::new();
                let watcher = tokio::spawn({
                    let cancel = cancel.clone();
                    async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                    }
                });

                let result = chat.run_turn_with_cancel(text, &cancel).await;
                watcher.abort();

                match result {
                    Ok(answer) => println!("\n{}", answer),
                    Err(ChatError::Cancelled) => println!("\n(cancelled)"),
                    Err(e) => {
                        tracing::error!(error = %e, "Turn failed");
                        println!("\n{}", e.user_message());
                    }
                }
            }
        }
    }

    tracing::info!(
        session = %chat.session().id,
        title = %chat.session().title(),
        turns = chat.session().turns,
        "Chat finished"
    );
    Ok(())
}
