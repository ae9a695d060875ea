//! Manual test harness: feeds stdin lines through the speak pipeline.
//!
//! Lines are `<username> <message>`; lines starting with `/` are admin
//! commands. Playback goes to a logging sink, so this binary is for
//! exercising the pipeline, not for actually hearing anything.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crier::core::orchestrator::ChatEvent;
use crier::{AppState, CrierConfig, LoggingSink};

fn usage() {
    println!("commands:");
    println!("  <username> <message>      speak a chat message");
    println!("  /allow <username>         whitelist a user");
    println!("  /deny <username>          remove a user's grants");
    println!("  /blacklist <username>     blacklist a user");
    println!("  /unblacklist <username>   lift a blacklist");
    println!("  /enable | /disable        flip the global kill-switch");
    println!("  /skip                     skip the current item");
    println!("  /clear                    clear the queue");
    println!("  /queue                    show queue state");
    println!("  /usage                    show per-engine usage");
    println!("  /quit                     exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Optional YAML config path as the single CLI argument
    let config = match std::env::args().nth(1) {
        Some(path) => CrierConfig::from_file(&PathBuf::from(path))
            .map_err(|e| anyhow!("config error: {e}"))?,
        None => CrierConfig::from_env().map_err(|e| anyhow!("config error: {e}"))?,
    };

    let state = AppState::new(config, Arc::new(LoggingSink)).await;
    println!("crier ready; type a message or /help");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("help"), _) => usage(),
                (Some("allow"), Some(user)) => {
                    state.permissions.allow(user, user).await?;
                }
                (Some("deny"), Some(user)) => {
                    state.permissions.deny(user, user).await?;
                }
                (Some("blacklist"), Some(user)) => {
                    state.permissions.blacklist(user, user).await?;
                }
                (Some("unblacklist"), Some(user)) => {
                    state.permissions.unblacklist(user, user).await?;
                }
                (Some("enable"), _) => state.orchestrator.set_enabled(true).await?,
                (Some("disable"), _) => state.orchestrator.set_enabled(false).await?,
                (Some("skip"), _) => state.queue.skip_current(),
                (Some("clear"), _) => {
                    let dropped = state.queue.clear();
                    println!("dropped {dropped} queued items");
                }
                (Some("queue"), _) => {
                    if let Some(current) = state.queue.current() {
                        println!("playing: {} ({})", current.text, current.username);
                    }
                    for item in state.queue.upcoming(10) {
                        println!("  [{}] {}: {}", item.priority, item.username, item.text);
                    }
                    println!("{} waiting", state.queue.len());
                }
                (Some("usage"), _) => {
                    for (engine, usage) in state.orchestrator.usage() {
                        println!(
                            "{engine}: {} requests, {} ok, {} failed, {} chars, ~${:.4}",
                            usage.requests,
                            usage.successes,
                            usage.failures,
                            usage.characters,
                            usage.cost_estimate_usd,
                        );
                    }
                }
                (Some("quit"), _) => break,
                _ => usage(),
            }
            continue;
        }

        let Some((username, message)) = line.split_once(' ') else {
            usage();
            continue;
        };
        let outcome = state
            .orchestrator
            .handle_chat_event(ChatEvent {
                text: message.to_string(),
                user_id: username.to_string(),
                username: username.to_string(),
                team_level: 0,
                is_subscriber: false,
                timestamp: SystemTime::now(),
            })
            .await;
        match outcome {
            Some(success) => println!(
                "queued at position {} on {} ({})",
                success.position, success.engine, success.voice
            ),
            None => println!("(not spoken; see log)"),
        }
    }

    state.shutdown();
    Ok(())
}
