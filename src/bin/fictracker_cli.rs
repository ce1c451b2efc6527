//! Command-line agent for a fictracker server.
//! Queues edits from its arguments and pushes them as one `sync` request,
//! the same way the browser userscript does.
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use fictracker_lib::client::{LocalMirror, TrackerClient};
use fictracker_lib::notes::NoteUpdate;
use fictracker_lib::protocol::SyncQueue;
use fictracker_lib::tags::Operation;

#[derive(Parser, Debug)]
#[command(name = "fictracker-cli", version, about)]
struct Cli {
    /// Tracker endpoint URL.
    #[arg(long, env = "FICTRACKER_ENDPOINT", default_value = "http://127.0.0.1:8787/")]
    endpoint: String,

    /// Ask for a compressed sync payload.
    #[arg(long)]
    compress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check connectivity.
    Ping,
    /// Print the server's last-modified stamp.
    LastModified,
    /// Add tags to an entry.
    Add { key: String, tags: Vec<String> },
    /// Remove tags from an entry.
    Remove { key: String, tags: Vec<String> },
    /// Replace an entry's tags.
    Set { key: String, tags: Vec<String> },
    /// Write a note; empty text deletes it.
    Note {
        id: String,
        #[arg(default_value = "")]
        text: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Print the full server state, or one entry.
    Show { key: Option<String> },
    /// Seed a fresh store from a JSON object file.
    Init { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fictracker_lib::init_logging();
    let cli = Cli::parse();
    let client = TrackerClient::new(&cli.endpoint)?;

    let show_key = match &cli.command {
        Command::Show { key } => key.clone(),
        _ => None,
    };

    let mut queue = SyncQueue::new();
    match cli.command {
        Command::Ping => {
            println!("{}: {}", client.endpoint(), client.ping().await?);
            return Ok(());
        }
        Command::LastModified => {
            match client.last_modified().await? {
                Some(stamp) => println!("{stamp}"),
                None => println!("(never modified)"),
            }
            return Ok(());
        }
        Command::Init { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let init_data: Map<String, Value> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON object", file.display()))?;
            println!("{}", client.initialize(init_data).await?);
            return Ok(());
        }
        Command::Add { key, tags } => queue.push_operation(Operation::add(key, tags)),
        Command::Remove { key, tags } => queue.push_operation(Operation::remove(key, tags)),
        Command::Set { key, tags } => queue.push_operation(Operation::set(key, tags)),
        Command::Note { id, text, date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            queue.push_note(NoteUpdate { fanfic_id: id, text: Some(text), date: Some(date) });
        }
        Command::Show { .. } => {}
    }

    let result = match client.flush(&mut queue, cli.compress).await {
        Ok(result) => result,
        Err(e) if e.is_retryable() => {
            bail!("{} is busy or unreachable, nothing was applied; retry later: {e}", client.endpoint())
        }
        Err(e) => return Err(e.into()),
    };
    if !result.success {
        bail!("server reported an unsuccessful sync");
    }
    let mut mirror = LocalMirror::new();
    mirror.reconcile(result.clone(), client.last_modified().await?);

    match show_key {
        Some(key) => {
            let tags = mirror.tags(&key);
            if tags.is_empty() {
                println!("{key}: (none)");
            } else {
                println!("{key}: {}", tags.join(","));
            }
            if let Some(note) = mirror.notes().get(&key) {
                println!("note ({}): {}", note.date, note.text);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}
