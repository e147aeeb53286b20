use anyhow::{anyhow, bail, Result};
use clap::Args;
use collab_client::{ClientError, CollabClient, CollabClientOptions};
use collab_common::CollabFail;
use collab_comms::InMemoryBus;
use collab_document::{TextDocument, TextStep};
use collab_server::{
    Disk, FileDisk, Manager, ManagerConfig, ManagerEndpoint, ManagerOptions, MemoryDisk,
    DEFAULT_CONFIG_NAME,
};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MANAGER_ID: &str = "manager";

/// Catch-up polls per client before giving up on convergence
const MAX_CATCH_UP_POLLS: usize = 20;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Config file (defaults to collab.config.json in the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Document id to edit
    #[arg(short, long, default_value = "doc1")]
    pub doc: String,

    /// Number of concurrent clients
    #[arg(long, default_value_t = 3)]
    pub clients: usize,

    /// Edits per client
    #[arg(long, default_value_t = 10)]
    pub edits: usize,

    /// Pause between edits in milliseconds
    #[arg(long, default_value_t = 5)]
    pub pause_ms: u64,

    /// Persist documents as JSON files in this directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Client request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub request_timeout_ms: u64,
}

pub fn simulate(args: SimulateArgs, cwd: &Path) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_NAME));
    let config = ManagerConfig::load(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, config))
}

async fn run(args: SimulateArgs, config: ManagerConfig) -> Result<()> {
    println!(
        "{} {} clients x {} edits on {}",
        "🔄 Simulating".bright_blue().bold(),
        args.clients,
        args.edits,
        args.doc.bright_white()
    );

    let disk: Arc<dyn Disk<TextDocument>> = match &args.data_dir {
        Some(dir) => Arc::new(FileDisk::new(dir)),
        None => Arc::new(MemoryDisk::new()),
    };
    let bus = InMemoryBus::new();
    let manager = Arc::new(Manager::<TextStep>::new(ManagerOptions::new(config, disk)));
    let endpoint = ManagerEndpoint::attach(manager.clone(), Arc::new(bus.clone()), MANAGER_ID);
    let signal = CancellationToken::new();

    let mut handles = Vec::with_capacity(args.clients);
    for index in 0..args.clients {
        let client = CollabClient::<TextStep>::connect(CollabClientOptions {
            doc_id: args.doc.clone(),
            user_id: format!("user-{}", index),
            client_id: format!("client-{}", index),
            manager_id: MANAGER_ID.to_string(),
            bus: Arc::new(bus.clone()),
            signal: signal.child_token(),
            request_timeout: Some(Duration::from_millis(args.request_timeout_ms)),
            pull_wait: Some(Duration::from_millis(50)),
        })
        .await?;

        let edits = args.edits;
        let pause = Duration::from_millis(args.pause_ms);
        handles.push(tokio::spawn(edit_loop(client, index, edits, pause)));
    }

    let mut clients = Vec::with_capacity(handles.len());
    for handle in handles {
        clients.push(handle.await??);
    }

    let server_version = manager
        .instance(&args.doc)
        .map(|instance| instance.version())
        .ok_or_else(|| anyhow!("document {} is not open", args.doc))?;

    for client in clients.iter_mut() {
        catch_up(client, server_version).await?;
    }

    let server_doc = manager
        .instance(&args.doc)
        .and_then(|instance| instance.snapshot().ok())
        .map(|snapshot| snapshot.doc.as_str().to_string())
        .unwrap_or_default();

    println!();
    let mut converged = true;
    for (index, client) in clients.iter().enumerate() {
        let matches = client.doc().as_str() == server_doc;
        converged &= matches;
        let mark = if matches { "✓".green() } else { "✗".red() };
        println!(
            "  {} client-{} v{} {:?}",
            mark,
            index,
            client.version(),
            client.doc().as_str()
        );
    }
    println!("  server v{} {:?}", server_version, server_doc);

    signal.cancel();
    endpoint.detach();
    manager.destroy().await;

    println!();
    if !converged {
        bail!("replicas diverged from the server document");
    }
    println!("✨ {} All replicas converged", "Done".green().bold());
    Ok(())
}

async fn edit_loop(
    mut client: CollabClient<TextStep>,
    index: usize,
    edits: usize,
    pause: Duration,
) -> Result<CollabClient<TextStep>> {
    for round in 0..edits {
        let step = next_edit(client.doc(), index, round);
        client.apply_local(vec![step])?;

        match client.sync().await {
            Ok(()) => {}
            Err(ClientError::Collab(CollabFail::ManagerUnresponsive)) => {
                tracing::warn!(client = index, "manager unresponsive, retrying later");
            }
            Err(error) => return Err(error.into()),
        }
        tokio::time::sleep(pause).await;
    }
    Ok(client)
}

async fn catch_up(client: &mut CollabClient<TextStep>, server_version: u64) -> Result<()> {
    for _ in 0..MAX_CATCH_UP_POLLS {
        client.sync().await?;
        if client.version() >= server_version && client.monitor().unconfirmed().is_empty() {
            return Ok(());
        }
        client.poll_upstream().await?;
    }
    bail!(
        "client stuck at version {} (server at {})",
        client.version(),
        server_version
    )
}

/// Deterministic edit for `client` in `round`: mostly single-letter inserts,
/// every fourth edit deletes a char
fn next_edit(doc: &TextDocument, client: usize, round: usize) -> TextStep {
    let len = doc.char_len();
    let pos = (client * 7 + round * 3) % (len + 1);

    if round % 4 == 3 && len > 0 {
        let pos = pos.min(len - 1);
        let removed: String = doc.as_str().chars().skip(pos).take(1).collect();
        TextStep::delete(pos, removed)
    } else {
        let letter = (b'a' + (client % 26) as u8) as char;
        TextStep::insert(pos, letter.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_document::Step;

    #[test]
    fn test_edits_apply_to_their_document() {
        let mut doc = TextDocument::from("");
        for round in 0..12 {
            let step = next_edit(&doc, 1, round);
            step.apply(&mut doc).unwrap();
        }
        assert_eq!(doc.char_len(), 6);
    }

    #[test]
    fn test_simulation_converges_with_file_disk() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");

        simulate(
            SimulateArgs {
                config: None,
                doc: "notes".to_string(),
                clients: 3,
                edits: 6,
                pause_ms: 1,
                data_dir: Some(data_dir.clone()),
                request_timeout_ms: 5_000,
            },
            dir.path(),
        )
        .unwrap();

        assert!(FileDisk::new(&data_dir).path_for("notes").exists());
    }
}
