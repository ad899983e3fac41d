use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use chat_wake::agent::TranscriptAgent;
use chat_wake::config::Config;
use chat_wake::dispatch::Dispatcher;
use chat_wake::events::TriggerWatcher;
use chat_wake::sessions::{SessionCommand, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("⏰ Chat Wake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data:   {}", config.data_dir.display());
    eprintln!("   Events: {}", config.watcher.events_dir.display());
    eprintln!("   Type `<conversation id> <message>` and press Enter. /quit to exit.\n");

    let sessions = Arc::new(SessionStore::new(config.data_dir.clone()));
    let agent = Arc::new(TranscriptAgent::new(Arc::clone(&sessions)));
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatch.clone(),
        Arc::clone(&sessions),
        agent,
    ));

    let mut watcher = TriggerWatcher::new(config.watcher.clone(), dispatcher.clone());
    watcher
        .start()
        .await
        .context("failed to start trigger watcher")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let Some((conversation_id, text)) = line.split_once(char::is_whitespace) else {
            eprintln!("Expected `<conversation id> <message>`");
            continue;
        };
        let text = text.trim();

        if let Some(command) = SessionCommand::parse(text) {
            let reply = dispatcher.submit_command(conversation_id, command);
            tokio::spawn(async move {
                match reply.await {
                    Ok(Ok(reply)) => println!("{reply}"),
                    Ok(Err(e)) => eprintln!("Session command failed: {e}"),
                    Err(_) => eprintln!("Session command was dropped"),
                }
            });
            continue;
        }

        dispatcher.submit_message(conversation_id, text);
    }

    watcher.stop().await;
    Ok(())
}

/// Stderr logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chat-wake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
