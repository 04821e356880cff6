use crate::classic::ClassicBuild;
use crate::CoreError;
use cedar_runtime::snap::seed_dir;
use cedar_runtime::{CommandSpec, VolumeWriteRequest};
use cedar_schema::GadgetInfo;
use cedar_store::BuildContext;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

fn gadget_info(ctx: &BuildContext) -> Result<&GadgetInfo, CoreError> {
    ctx.gadget_info.as_ref().ok_or_else(|| {
        CoreError::Step("no gadget layout loaded; load_gadget_yaml has not run".to_owned())
    })
}

fn volume_for(ctx: &BuildContext, requested: Option<&String>) -> Result<String, CoreError> {
    requested
        .or(ctx.main_volume_name.as_ref())
        .cloned()
        .ok_or_else(|| CoreError::Step("no volume to write".to_owned()))
}

/// Write one gadget volume, with the chroot as its system-data content.
fn write_volume(
    build: &ClassicBuild,
    volume_name: &str,
    image_path: &Path,
) -> Result<(), CoreError> {
    let ctx = &build.machine.ctx;
    let info = gadget_info(ctx)?;
    let volume = info.volume(volume_name).ok_or_else(|| {
        CoreError::Step(format!("volume {volume_name} is not declared in gadget.yaml"))
    })?;
    let size = ctx
        .image_sizes
        .get(volume_name)
        .copied()
        .unwrap_or_else(|| volume.min_size());
    let gadget_dir = ctx.layout().gadget_dir();
    info!("writing volume {volume_name} to {}", image_path.display());
    build.services.gadget.write_volume(&VolumeWriteRequest {
        volume,
        gadget_dir: &gadget_dir,
        rootfs_dir: &ctx.chroot_dir,
        image_path,
        size,
        sector_size: ctx.sector_size,
    })?;
    Ok(())
}

/// Write every requested raw disk image into the output directory.
pub(crate) fn make_disk(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let images = build.definition()?.artifacts().img;
    for artifact in &images {
        let volume = volume_for(&build.machine.ctx, artifact.volume.as_ref())?;
        let path = build.machine.output_dir().join(&artifact.name);
        write_volume(build, &volume, &path)?;
        build
            .machine
            .ctx
            .volume_names
            .insert(volume, artifact.name.clone());
    }
    Ok(())
}

/// Convert raw volume images into compressed qcow2 images.
///
/// A volume that `make_disk` did not write is first written into the
/// volumes directory.
pub(crate) fn make_qcow2_image(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let images = build.definition()?.artifacts();
    for artifact in &images.qcow2 {
        let volume = volume_for(&build.machine.ctx, artifact.volume.as_ref())?;
        let written = images
            .img
            .iter()
            .find(|img| {
                volume_for(&build.machine.ctx, img.volume.as_ref()).is_ok_and(|v| v == volume)
            })
            .map(|img| build.machine.output_dir().join(&img.name))
            .filter(|p| p.exists());
        let raw: PathBuf = match written {
            Some(path) => path,
            None => {
                let path = build.machine.ctx.volumes_dir.join(format!("{volume}.img"));
                write_volume(build, &volume, &path)?;
                path
            }
        };

        let dest = build.machine.output_dir().join(&artifact.name);
        let cmd = CommandSpec::new("qemu-img")
            .args(["convert", "-c", "-O", "qcow2"])
            .path_arg(&raw)
            .path_arg(&dest);
        build.services.runner.run(&cmd)?;
    }
    Ok(())
}

/// `<name> <revision>` for every `<name>_<revision>.snap` in `snaps_dir`.
///
/// A missing or unreadable directory yields no lines.
fn snap_manifest(snaps_dir: &Path) -> String {
    let Ok(entries) = fs::read_dir(snaps_dir) else {
        debug!("no snaps found in {}", snaps_dir.display());
        return String::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(".snap"))
        .collect();
    names.sort();

    let mut manifest = String::new();
    for file in names {
        let stem = file.trim_end_matches(".snap");
        if let Some((name, revision)) = stem.split_once('_') {
            let _ = writeln!(manifest, "{name} {revision}");
        }
    }
    manifest
}

/// Write the snap manifest for `snaps_dir` to `output`.
pub fn write_snap_manifest(snaps_dir: &Path, output: &Path) -> Result<(), CoreError> {
    fs::write(output, snap_manifest(snaps_dir))
        .map_err(|e| CoreError::Step(format!("Error creating manifest file: {e}")))
}

/// List installed packages followed by seeded snaps.
pub(crate) fn generate_package_manifest(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let Some(artifact) = def.artifacts().manifest else {
        return Ok(());
    };
    let chroot = &machine.ctx.chroot_dir;
    let cmd = CommandSpec::new("chroot")
        .path_arg(chroot)
        .args(["dpkg-query", "-W", "--showformat=${Package} ${Version}\n"]);
    let packages = services.runner.run(&cmd)?.stdout;

    let mut manifest = packages;
    manifest.push_str(&snap_manifest(&seed_dir(chroot).join("snaps")));
    let dest = machine.output_dir().join(artifact.name);
    fs::write(&dest, manifest)?;
    info!("wrote package manifest {}", dest.display());
    Ok(())
}

/// Every path in the chroot, rooted at `/`, sorted.
fn filelist(root: &Path) -> Result<String, CoreError> {
    let mut list = String::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| CoreError::Step(e.to_string()))?;
        let _ = writeln!(list, "/{}", rel.display());
    }
    Ok(list)
}

pub(crate) fn generate_filelist(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, _, machine) = build.parts()?;
    let Some(artifact) = def.artifacts().filelist else {
        return Ok(());
    };
    let list = filelist(&machine.ctx.chroot_dir)?;
    let dest = machine.output_dir().join(artifact.name);
    fs::write(&dest, list)?;
    info!("wrote filelist {}", dest.display());
    Ok(())
}
