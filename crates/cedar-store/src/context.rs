use crate::layout::WorkLayout;
use cedar_schema::GadgetInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Mutable state threaded through every build step.
///
/// This is the part of a build that survives a checkpoint: progress, the
/// work-directory paths, computed sizes, and what earlier steps accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildContext {
    pub current_step: String,
    pub steps_taken: usize,
    pub work_dir: PathBuf,
    pub rootfs_dir: PathBuf,
    pub unpack_dir: PathBuf,
    pub volumes_dir: PathBuf,
    pub chroot_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub sector_size: u64,
    /// Image size in bytes, keyed by volume name.
    #[serde(default)]
    pub image_sizes: BTreeMap<String, u64>,
    /// Order in which volumes are written.
    #[serde(default)]
    pub volume_order: Vec<String>,
    /// Output file name, keyed by volume name.
    #[serde(default)]
    pub volume_names: BTreeMap<String, String>,
    #[serde(default)]
    pub main_volume_name: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub snaps: Vec<String>,
    #[serde(default)]
    pub gadget_info: Option<GadgetInfo>,
}

impl BuildContext {
    pub fn new(layout: &WorkLayout, sector_size: u64) -> Self {
        Self {
            current_step: String::new(),
            steps_taken: 0,
            work_dir: layout.root().to_path_buf(),
            rootfs_dir: layout.rootfs_dir(),
            unpack_dir: layout.unpack_dir(),
            volumes_dir: layout.volumes_dir(),
            chroot_dir: layout.chroot_dir(),
            scratch_dir: layout.scratch_dir(),
            sector_size,
            image_sizes: BTreeMap::new(),
            volume_order: Vec::new(),
            volume_names: BTreeMap::new(),
            main_volume_name: None,
            packages: Vec::new(),
            snaps: Vec::new(),
            gadget_info: None,
        }
    }

    pub fn layout(&self) -> WorkLayout {
        WorkLayout::new(&self.work_dir)
    }

    /// Append snaps that are not already listed, keeping first-seen order.
    pub fn add_unique_snaps<I, S>(&mut self, snaps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for snap in snaps {
            let snap = snap.into();
            if !self.snaps.contains(&snap) {
                self.snaps.push(snap);
            }
        }
    }

    pub fn add_unique_packages<I, S>(&mut self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for package in packages {
            let package = package.into();
            if !self.packages.contains(&package) {
                self.packages.push(package);
            }
        }
    }
}
