//! Content-addressed file storage for stash nodes.
//!
//! Every object is addressed by a logical key. A [`PathTransform`] turns the
//! key into a [`PathKey`] (a directory chain plus a file name) and the
//! [`Store`] persists the bytes at `root/<segments>/<file_name>`.
//!
//! # Transforms
//!
//! - [`IdentityTransform`] -- the key is used verbatim as directory and file
//!   name. Handy when a human needs to find objects on disk.
//! - [`CasTransform`] -- the key is hashed with SHA-1 and the hex digest is
//!   split into fixed-width shards, bounding the fan-out of each directory.
//!
//! # Design Rules
//!
//! 1. The transform is fixed for the life of a store.
//! 2. Paths are recomputed per operation, never cached.
//! 3. At most one writer touches a given bucket at a time.
//! 4. A missing object is reported as [`StoreError::NotFound`], distinct from
//!    genuine I/O failure.
//! 5. Deletion removes the whole first-level bucket of a key.

pub mod error;
pub mod fs;
pub mod path;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem};
pub use path::{CasTransform, IdentityTransform, PathKey, PathTransform, TransformKind};
pub use store::{Store, StoreConfig, DEFAULT_ROOT};
