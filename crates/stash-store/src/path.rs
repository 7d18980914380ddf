use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Physical location of an object, relative to the store root.
///
/// Both parts are derived from the same key by a [`PathTransform`]; equal
/// keys always yield equal path keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathKey {
    /// Directory chain, outermost first.
    pub segments: Vec<String>,
    /// File name inside the innermost directory.
    pub file_name: String,
}

impl PathKey {
    /// The top-level directory component of this key, shared by every key
    /// in the same bucket. A segment holding a nested path (`a/b`) yields
    /// its first component (`a`). Empty when the transform produced no
    /// segments.
    pub fn first_segment(&self) -> &str {
        self.segments
            .first()
            .and_then(|seg| Path::new(seg).components().next())
            .and_then(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .unwrap_or("")
    }

    /// Relative directory path (`seg/seg/...`).
    pub fn dir_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Relative path of the object file (`seg/seg/.../file_name`).
    pub fn full_path(&self) -> PathBuf {
        self.dir_path().join(&self.file_name)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "{seg}/")?;
        }
        f.write_str(&self.file_name)
    }
}

/// Deterministic mapping from a logical key to a [`PathKey`].
///
/// Implementations must be pure: no I/O, no state, and the same key must
/// always produce the same path key.
pub trait PathTransform: Send + Sync {
    fn transform(&self, key: &str) -> PathKey;

    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;
}

/// Uses the key verbatim as both directory and file name.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl PathTransform for IdentityTransform {
    fn transform(&self, key: &str) -> PathKey {
        PathKey {
            segments: vec![key.to_string()],
            file_name: key.to_string(),
        }
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Content-addressed layout: SHA-1 of the key, hex-encoded and split into
/// `block_size`-wide directory shards.
///
/// Only full blocks become directories. With the default block size of 5
/// the 40-character digest splits evenly into 8 shards; for sizes that do
/// not divide 40 the trailing characters are left out of the directory
/// chain (the file name always carries the full digest).
#[derive(Clone, Copy, Debug)]
pub struct CasTransform {
    block_size: usize,
}

impl CasTransform {
    pub const DEFAULT_BLOCK_SIZE: usize = 5;

    /// Create a transform with a custom shard width. Zero is clamped to 1.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Lowercase hex SHA-1 of the key's UTF-8 bytes.
    pub fn digest_hex(key: &str) -> String {
        hex::encode(Sha1::digest(key.as_bytes()))
    }
}

impl Default for CasTransform {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BLOCK_SIZE)
    }
}

impl PathTransform for CasTransform {
    fn transform(&self, key: &str) -> PathKey {
        let digest = Self::digest_hex(key);
        let blocks = digest.len() / self.block_size;
        let segments = (0..blocks)
            .map(|i| digest[i * self.block_size..(i + 1) * self.block_size].to_string())
            .collect();
        PathKey {
            segments,
            file_name: digest,
        }
    }

    fn name(&self) -> &'static str {
        "cas"
    }
}

/// The closed set of transforms selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    Identity,
    #[default]
    ContentAddressed,
}

impl TransformKind {
    pub fn build(self) -> Box<dyn PathTransform> {
        match self {
            Self::Identity => Box::new(IdentityTransform),
            Self::ContentAddressed => Box::new(CasTransform::default()),
        }
    }
}

impl FromStr for TransformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "cas" | "content-addressed" => Ok(Self::ContentAddressed),
            other => Err(format!("unknown path transform: {other}")),
        }
    }
}
