use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stash_p2p::TcpTransportConfig;
use stash_store::StoreConfig;

/// Node configuration, read from a TOML file.
///
/// ```toml
/// [store]
/// root = "/data/stash"
/// transform = "content-addressed"
///
/// [transport]
/// listen_addr = ":3000"
/// decoder = "frame"
/// handshake = "nop"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub transport: TcpTransportConfig,
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
