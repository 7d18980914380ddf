use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stash_p2p::{DecoderKind, HandshakeKind};
use stash_store::TransformKind;

#[derive(Parser)]
#[command(
    name = "stash",
    about = "Stash: content-addressed peer-to-peer file store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path transform: `cas` or `identity` (overrides the config file)
    #[arg(long, global = true)]
    pub transform: Option<TransformKind>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a node: accept peers and store what they send
    Serve(ServeArgs),
    /// Store a file (or stdin) under a key
    Put(PutArgs),
    /// Write the object stored under a key to stdout
    Get(KeyArgs),
    /// Check whether a key is stored
    Has(KeyArgs),
    /// Delete the bucket a key lives in
    Delete(KeyArgs),
    /// Show where a key is stored on disk
    Path(KeyArgs),
    /// Send a file (or stdin) to a running node
    Send(SendArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address, e.g. `:3000` or `127.0.0.1:3000`
    #[arg(short, long)]
    pub listen: Option<String>,
    /// Message decoder: `frame` or `naive`
    #[arg(long)]
    pub decoder: Option<DecoderKind>,
    /// Connection handshake: `nop` or `magic`
    #[arg(long)]
    pub handshake: Option<HandshakeKind>,
}

#[derive(Args)]
pub struct PutArgs {
    pub key: String,
    /// File to read; stdin when omitted
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct SendArgs {
    /// Address of the receiving node
    pub addr: String,
    pub key: String,
    /// File to read; stdin when omitted
    pub file: Option<PathBuf>,
    /// Connection handshake: `nop` or `magic`
    #[arg(long)]
    pub handshake: Option<HandshakeKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "stash", "serve", "--listen", ":8080", "--decoder", "naive", "--transform", "identity",
        ])
        .unwrap();
        assert_eq!(cli.transform, Some(TransformKind::Identity));
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.listen.as_deref(), Some(":8080"));
                assert_eq!(args.decoder, Some(DecoderKind::Naive));
                assert_eq!(args.handshake, None);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn rejects_unknown_decoder() {
        assert!(Cli::try_parse_from(["stash", "serve", "--decoder", "gob"]).is_err());
    }
}
