//! Work-directory layout, build context, and checkpoint persistence for cedar.
//!
//! `WorkLayout` derives every build path from one work-directory root,
//! `BuildContext` carries the state that steps mutate, and the checkpoint
//! module snapshots that state to `cedar.json` so an interrupted build can
//! be resumed.

pub mod checkpoint;
pub mod context;
pub mod layout;

pub use checkpoint::{decode, encode, Checkpoint, CheckpointStore, CHECKPOINT_FORMAT_VERSION};
pub use context::{BuildContext, DEFAULT_SECTOR_SIZE};
pub use layout::{WorkLayout, CHECKPOINT_FILE};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding rename is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("checkpoint format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
    #[error("no checkpoint found at {}", .0.display())]
    CheckpointNotFound(PathBuf),
}
