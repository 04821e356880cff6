use crate::classic::{ClassicBuild, Services};
use crate::CoreError;
use cedar_runtime::{parse_snap_spec, with_mounts, CommandSpec, MountPoint, PrepareOptions};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Install the queued and extra packages, then stage every requested snap
/// into the chroot.
pub(crate) fn prepare_image(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let chroot = machine.ctx.chroot_dir.clone();

    machine.ctx.add_unique_packages(def.extra_packages());
    services
        .installer
        .install_packages(&chroot, &machine.ctx.packages)?;

    let mut opts = PrepareOptions {
        root: chroot.clone(),
        architecture: def.architecture.clone(),
        default_channel: machine.common.channel.clone(),
        validation: machine.common.validation.map(|v| v.to_string()),
        scratch_dir: machine.ctx.scratch_dir.clone(),
        ..PrepareOptions::default()
    };
    for spec in &machine.ctx.snaps {
        let (name, channel) = parse_snap_spec(spec)?;
        add_snap(&mut opts, name, channel);
    }
    reset_preseeding(services, &chroot, &mut opts)?;

    for snap in def.extra_snaps() {
        add_snap(&mut opts, snap.name.clone(), Some(snap.channel.clone()));
        if let Some(revision) = snap.revision {
            warn!(
                "revision {revision} for snap {} may not be the latest available version!",
                snap.name
            );
            opts.revisions.insert(snap.name.clone(), revision);
        }
    }

    info!("staging {} snaps", opts.snaps.len());
    services.installer.prepare(&opts)?;
    machine.ctx.add_unique_snaps(opts.snaps);
    Ok(())
}

fn add_snap(opts: &mut PrepareOptions, name: String, channel: Option<String>) {
    if let Some(channel) = channel.filter(|c| !c.is_empty()) {
        opts.channels.insert(name.clone(), channel);
    }
    if !opts.snaps.contains(&name) {
        opts.snaps.push(name);
    }
}

fn snap_preseed(chroot: &Path) -> CommandSpec {
    CommandSpec::new(chroot.join("usr/lib/snapd/snap-preseed").display().to_string())
}

/// Undo an earlier preseed so the seed can be rebuilt, keeping the snaps
/// it already carried.
fn reset_preseeding(
    services: &Services,
    chroot: &Path,
    opts: &mut PrepareOptions,
) -> Result<(), CoreError> {
    if !chroot.join("var/lib/snapd/state.json").exists() {
        return Ok(());
    }
    info!("chroot is already preseeded, resetting it");
    for (name, channel) in services.installer.seeded_snaps(chroot)? {
        if !opts.snaps.contains(&name) {
            add_snap(opts, name, Some(channel));
        }
    }
    let cmd = snap_preseed(chroot).arg("--reset").path_arg(chroot);
    services.runner.run(&cmd).map_err(|e| {
        CoreError::Step(format!("Error resetting preseeding in the chroot: {e}"))
    })?;
    Ok(())
}

/// Virtual filesystems snap-preseed needs inside the chroot, in mount order.
pub fn preseed_mounts(chroot: &Path) -> Vec<MountPoint> {
    vec![
        MountPoint::new("devtmpfs-build", chroot, "/dev", "devtmpfs"),
        MountPoint::new("devpts-build", chroot, "/dev/pts", "devpts").with_opts(&["nodev", "nosuid"]),
        MountPoint::new("proc-build", chroot, "/proc", "proc"),
        MountPoint::new("none", chroot, "/sys/kernel/security", "securityfs"),
        MountPoint::new("none", chroot, "/sys/fs/cgroup", "cgroup2"),
    ]
}

/// Run snap-preseed inside the chroot with its virtual filesystems mounted.
pub(crate) fn preseed_image(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (_, services, machine) = build.parts()?;
    let chroot = machine.ctx.chroot_dir.clone();
    let points = preseed_mounts(&chroot);
    for point in &points {
        fs::create_dir_all(point.target())?;
    }

    let preseed = snap_preseed(&chroot).path_arg(&chroot);
    with_mounts(services.runner.as_ref(), &points, |runner| {
        runner.run(&preseed).map(|_| ())
    })?;
    Ok(())
}
