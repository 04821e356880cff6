use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "cedar.json";

/// Directory layout under a build's work directory.
///
/// Every path a build writes to is derived from the single work-directory
/// root. Nothing is created until [`initialize`](Self::initialize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join("root")
    }

    #[inline]
    pub fn unpack_dir(&self) -> PathBuf {
        self.root.join("unpack")
    }

    /// Checked-out or copied gadget tree.
    #[inline]
    pub fn gadget_dir(&self) -> PathBuf {
        self.unpack_dir().join("gadget")
    }

    #[inline]
    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    #[inline]
    pub fn chroot_dir(&self) -> PathBuf {
        self.root.join("chroot")
    }

    #[inline]
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    #[inline]
    pub fn checkpoint_file(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.rootfs_dir())?;
        fs::create_dir_all(self.unpack_dir())?;
        fs::create_dir_all(self.volumes_dir())?;
        fs::create_dir_all(self.chroot_dir())?;
        fs::create_dir_all(self.scratch_dir())?;
        Ok(())
    }
}
