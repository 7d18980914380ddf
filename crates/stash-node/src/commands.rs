use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use colored::Colorize;
use stash_p2p::{Message, TcpTransport, TcpTransportOpts, Transport};
use stash_store::Store;

use crate::cli::*;
use crate::config::NodeConfig;
use crate::node::Node;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args).await,
        Command::Put(args) => cmd_put(config, args),
        Command::Get(args) => cmd_get(config, args),
        Command::Has(args) => cmd_has(config, args),
        Command::Delete(args) => cmd_delete(config, args),
        Command::Path(args) => cmd_path(config, args),
        Command::Send(args) => cmd_send(args).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.store.root = root.clone();
    }
    if let Some(transform) = cli.transform {
        config.store.transform = transform;
    }
    Ok(config)
}

fn read_input(file: Option<PathBuf>) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    match file {
        Some(path) => {
            data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            io::stdin().read_to_end(&mut data)?;
        }
    }
    Ok(data)
}

async fn cmd_serve(mut config: NodeConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(listen) = args.listen {
        config.transport.listen_addr = listen;
    }
    if let Some(decoder) = args.decoder {
        config.transport.decoder = decoder;
    }
    if let Some(handshake) = args.handshake {
        config.transport.handshake = handshake;
    }
    println!(
        "Stash node on {} (root: {})",
        config.transport.listen_addr.bold(),
        config.store.root.display()
    );
    Node::new(config)
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

fn cmd_put(config: NodeConfig, args: PutArgs) -> anyhow::Result<()> {
    let data = read_input(args.file)?;
    let store = Store::new(config.store);
    let n = store.write_bytes(&args.key, &data)?;
    println!("{} Stored {} bytes under {}", "✓".green().bold(), n, args.key.yellow());
    Ok(())
}

fn cmd_get(config: NodeConfig, args: KeyArgs) -> anyhow::Result<()> {
    let store = Store::new(config.store);
    let mut object = store.read(&args.key)?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut object, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_has(config: NodeConfig, args: KeyArgs) -> anyhow::Result<()> {
    let store = Store::new(config.store);
    if store.has(&args.key)? {
        println!("{} {}", "✓".green(), args.key.yellow());
    } else {
        println!("{} {} not stored", "✗".red(), args.key.yellow());
    }
    Ok(())
}

fn cmd_delete(config: NodeConfig, args: KeyArgs) -> anyhow::Result<()> {
    let store = Store::new(config.store);
    store.delete(&args.key)?;
    println!("{} Deleted bucket of {}", "✓".green(), args.key.yellow());
    Ok(())
}

fn cmd_path(config: NodeConfig, args: KeyArgs) -> anyhow::Result<()> {
    let store = Store::new(config.store);
    println!("{}", store.resolve(&args.key)?.display());
    Ok(())
}

async fn cmd_send(args: SendArgs) -> anyhow::Result<()> {
    let data = read_input(args.file)?;
    let size = data.len();
    let transport = TcpTransport::new(TcpTransportOpts {
        handshake: args.handshake.unwrap_or_default().build(),
        ..Default::default()
    });
    let peer = transport.dial(&args.addr).await?;
    peer.send_message(&Message::Store { key: args.key.clone(), data })
        .await?;
    transport.close().await;
    println!(
        "{} Sent {} bytes under {} to {}",
        "✓".green().bold(),
        size,
        args.key.yellow(),
        args.addr.bold()
    );
    Ok(())
}
