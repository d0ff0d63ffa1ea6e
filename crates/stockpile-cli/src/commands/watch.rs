use anyhow::{Result, anyhow};
use colored::Colorize;
use stockpile_cache::{CacheSystem, InvalidationEvent};

use crate::cli::{OutputFormat, WatchArgs};

pub async fn watch(
    system: &CacheSystem,
    channel: &str,
    args: &WatchArgs,
    format: OutputFormat,
) -> Result<()> {
    if !system.is_distributed() {
        eprintln!(
            "{} watching the in-process store: only this process's events are visible",
            "!".yellow()
        );
    }

    let mut subscription = system
        .store()
        .subscribe(channel)
        .await
        .map_err(|e| anyhow!("failed to subscribe to {channel}: {e}"))?;
    eprintln!("{} {} (Ctrl-C to stop)", "Watching".cyan(), channel);

    let mut seen = 0usize;
    loop {
        if args.limit.is_some_and(|limit| seen >= limit) {
            break;
        }
        let payload = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = subscription.next_message() => match message {
                Some(payload) => payload,
                None => return Err(anyhow!("subscription to {channel} closed")),
            },
        };
        seen += 1;

        match (format, serde_json::from_str::<InvalidationEvent>(&payload)) {
            (OutputFormat::Json, _) | (_, Err(_)) => println!("{payload}"),
            (OutputFormat::Table, Ok(event)) => println!(
                "{} {} {}",
                event.timestamp.to_string().dimmed(),
                event.tag.green(),
                describe(&event).dimmed()
            ),
        }
    }
    Ok(())
}

fn describe(event: &InvalidationEvent) -> String {
    let mut parts = Vec::new();
    if !event.options.cascade {
        parts.push("no-cascade");
    }
    if !event.options.store {
        parts.push("local");
    }
    let from = event.source_instance_id.as_deref().unwrap_or("unknown");
    if parts.is_empty() {
        format!("from {from}")
    } else {
        format!("from {from} [{}]", parts.join(", "))
    }
}
