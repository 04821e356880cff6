use crate::context::BuildContext;
use crate::layout::WorkLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

/// Current checkpoint format version. Incremented on incompatible changes.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// On-disk snapshot of a build.
///
/// JSON arrays keep element order, which the gadget layout relies on: its
/// structure indices are rebuilt from array position after decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub format_version: u32,
    pub saved_at: String,
    pub context: BuildContext,
    /// blake3 over the checkpoint serialized without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Checkpoint {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Serialize a build context, stamping format version, time, and checksum.
pub fn encode(ctx: &BuildContext) -> Result<Vec<u8>, StoreError> {
    let mut checkpoint = Checkpoint {
        format_version: CHECKPOINT_FORMAT_VERSION,
        saved_at: chrono::Utc::now().to_rfc3339(),
        context: ctx.clone(),
        checksum: None,
    };
    checkpoint.checksum = Some(checkpoint.compute_checksum()?);
    Ok(serde_json::to_vec_pretty(&checkpoint)?)
}

/// Decode and verify a checkpoint, rebuilding derived gadget indices.
pub fn decode(bytes: &[u8]) -> Result<BuildContext, StoreError> {
    let checkpoint: Checkpoint = serde_json::from_slice(bytes)?;

    if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: CHECKPOINT_FORMAT_VERSION,
            found: checkpoint.format_version,
        });
    }

    let Some(expected) = checkpoint.checksum.clone() else {
        return Err(StoreError::CorruptCheckpoint(
            "missing checksum".to_owned(),
        ));
    };
    let actual = checkpoint.compute_checksum()?;
    if actual != expected {
        return Err(StoreError::CorruptCheckpoint(format!(
            "checksum mismatch: expected {expected}, got {actual}"
        )));
    }

    let mut ctx = checkpoint.context;
    if let Some(info) = ctx.gadget_info.as_mut() {
        info.reindex();
    }
    Ok(ctx)
}

/// Reads and atomically writes the checkpoint file of one work directory.
pub struct CheckpointStore {
    layout: WorkLayout,
}

impl CheckpointStore {
    pub fn new(layout: WorkLayout) -> Self {
        Self { layout }
    }

    pub fn exists(&self) -> bool {
        self.layout.checkpoint_file().exists()
    }

    pub fn write(&self, ctx: &BuildContext) -> Result<(), StoreError> {
        let content = encode(ctx)?;
        let dir = self.layout.root();
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.checkpoint_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;

        debug!(
            "checkpoint written after {} steps to {}",
            ctx.steps_taken,
            self.layout.checkpoint_file().display()
        );
        Ok(())
    }

    pub fn read(&self) -> Result<BuildContext, StoreError> {
        let path = self.layout.checkpoint_file();
        if !path.exists() {
            return Err(StoreError::CheckpointNotFound(path));
        }
        decode(&fs::read(&path)?)
    }
}
