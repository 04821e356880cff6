//! Classic image build steps, in the order the planner uses them.

mod apt;
mod artifacts;
mod chroot;
mod gadget;
mod image;
mod rootfs;

pub use artifacts::write_snap_manifest;
pub use image::preseed_mounts;

use crate::classic::ClassicBuild;
use crate::machine::Step;
use std::path::{Path, PathBuf};

pub const PREPARE_GADGET_TREE: Step<ClassicBuild> =
    Step::new("prepare_gadget_tree", gadget::prepare_gadget_tree);
pub const LOAD_GADGET_YAML: Step<ClassicBuild> =
    Step::new("load_gadget_yaml", gadget::load_gadget_yaml);
pub const GERMINATE: Step<ClassicBuild> = Step::new("germinate", chroot::germinate);
pub const CREATE_CHROOT: Step<ClassicBuild> = Step::new("create_chroot", chroot::create_chroot);
pub const EXTRACT_ROOTFS_TAR: Step<ClassicBuild> =
    Step::new("extract_rootfs_tar", chroot::extract_rootfs_tar);
pub const ADD_EXTRA_PPAS: Step<ClassicBuild> = Step::new("add_extra_ppas", apt::add_extra_ppas);
pub const PREPARE_IMAGE: Step<ClassicBuild> = Step::new("prepare_image", image::prepare_image);
pub const CUSTOMIZE_CLOUD_INIT: Step<ClassicBuild> =
    Step::new("customize_cloud_init", rootfs::customize_cloud_init);
pub const CUSTOMIZE_SOURCES_LIST: Step<ClassicBuild> =
    Step::new("customize_sources_list", apt::customize_sources_list);
pub const CUSTOMIZE_MANUAL: Step<ClassicBuild> =
    Step::new("customize_manual", rootfs::customize_manual);
pub const PRESEED_IMAGE: Step<ClassicBuild> = Step::new("preseed_image", image::preseed_image);
pub const SET_DEFAULT_LOCALE: Step<ClassicBuild> =
    Step::new("set_default_locale", rootfs::set_default_locale);
pub const CLEAN_ROOTFS: Step<ClassicBuild> = Step::new("clean_rootfs", rootfs::clean_rootfs);
pub const MAKE_DISK: Step<ClassicBuild> = Step::new("make_disk", artifacts::make_disk);
pub const MAKE_QCOW2_IMAGE: Step<ClassicBuild> =
    Step::new("make_qcow2_image", artifacts::make_qcow2_image);
pub const GENERATE_PACKAGE_MANIFEST: Step<ClassicBuild> =
    Step::new("generate_package_manifest", artifacts::generate_package_manifest);
pub const GENERATE_FILELIST: Step<ClassicBuild> =
    Step::new("generate_filelist", artifacts::generate_filelist);

/// `path` as seen from inside `root`.
fn in_root(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Resolve a definition-relative source, accepting a `file://` prefix.
fn resolve_source(source: &str, conf_def_dir: &Path) -> PathBuf {
    let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        conf_def_dir.join(path)
    }
}
