use super::{apt, resolve_source};
use crate::classic::ClassicBuild;
use crate::CoreError;
use cedar_runtime::{download, is_remote, unpack_tarball, verify_sha256, CommandSpec};
use cedar_schema::{BuildDefinition, Seed};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn germinate_command(def: &BuildDefinition, seed: &Seed) -> CommandSpec {
    let branch = seed.branch.as_deref().unwrap_or(&def.series);
    let cmd = CommandSpec::new("germinate")
        .args(["--mirror", def.rootfs.mirror.as_str()])
        .args(["--arch", def.architecture.as_str()])
        .args(["--dist", def.series.as_str()])
        .arg("--no-rdepends")
        .arg("--components")
        .arg(def.rootfs.components.join(","))
        .arg("--seed-source")
        .arg(seed.urls.join(","))
        .arg("--seed-dist")
        .arg(format!("{}.{branch}", def.rootfs.flavor));
    if seed.vcs {
        cmd.arg("--vcs=auto")
    } else {
        cmd
    }
}

/// First column of every package row in a germinate output table.
fn parse_seed_output(content: &str) -> Result<Vec<String>, CoreError> {
    let row = Regex::new(r"^[a-z0-9]")
        .map_err(|e| CoreError::Step(format!("invalid seed pattern: {e}")))?;
    Ok(content
        .lines()
        .filter(|line| row.is_match(line))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect())
}

fn read_seed_output(path: &Path) -> Result<Vec<String>, CoreError> {
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::Step(format!("Error reading seed output {}: {e}", path.display()))
    })?;
    parse_seed_output(&content)
}

/// Expand the definition's seeds into the packages and snaps to install.
pub(crate) fn germinate(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let Some(seed) = &def.rootfs.seed else {
        return Ok(());
    };
    let dir = machine.ctx.scratch_dir.join("germinate");
    fs::create_dir_all(&dir)?;

    let cmd = germinate_command(def, seed).current_dir(&dir);
    services
        .runner
        .run(&cmd)
        .map_err(|e| CoreError::Step(format!("Error running germinate command: {e}")))?;

    for name in &seed.names {
        let packages = read_seed_output(&dir.join(name))?;
        debug!("seed {name} lists {} packages", packages.len());
        machine.ctx.add_unique_packages(packages);
        let snaps = dir.join(format!("{name}.snaps"));
        if snaps.exists() {
            machine.ctx.add_unique_snaps(read_seed_output(&snaps)?);
        }
    }
    Ok(())
}

/// Bootstrap a minimal chroot and point apt at the definition's mirror.
/// The kernel is queued for installation alongside the seeded packages.
pub(crate) fn create_chroot(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let chroot = machine.ctx.chroot_dir.clone();

    let cmd = CommandSpec::new("debootstrap")
        .arg(format!("--arch={}", def.architecture))
        .arg("--variant=minbase")
        .arg(format!("--components={}", def.rootfs.components.join(",")))
        .arg(def.series.as_str())
        .path_arg(&chroot)
        .arg(def.rootfs.mirror.as_str());
    services
        .runner
        .run(&cmd)
        .map_err(|e| CoreError::Step(format!("Error running debootstrap command: {e}")))?;

    apt::write_sources_list(
        &chroot,
        &apt::SourcesList::new(def, &def.rootfs.components, def.rootfs.pocket),
    )?;
    if !def.kernel.is_empty() {
        machine.ctx.add_unique_packages([def.kernel.clone()]);
    }
    Ok(())
}

/// A local path for `location`, downloading it into `scratch` when remote.
fn fetch_input(location: &str, conf_def_dir: &Path, scratch: &Path) -> Result<PathBuf, CoreError> {
    if !is_remote(location) {
        return Ok(resolve_source(location, conf_def_dir));
    }
    let name = location
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("download");
    let dest = scratch.join(name);
    download(location, &dest)?;
    Ok(dest)
}

/// Unpack the definition's rootfs tarball into the chroot, after checking
/// its checksum and signature when the definition provides them.
pub(crate) fn extract_rootfs_tar(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let Some(tarball) = &def.rootfs.tarball else {
        return Ok(());
    };
    let scratch = machine.ctx.scratch_dir.clone();
    let archive = fetch_input(&tarball.url, machine.conf_def_dir(), &scratch)?;

    if let Some(sum) = &tarball.sha256sum {
        verify_sha256(&archive, sum)?;
    }
    if let Some(gpg) = &tarball.gpg {
        let signature = fetch_input(gpg, machine.conf_def_dir(), &scratch)?;
        let cmd = CommandSpec::new("gpg")
            .arg("--verify")
            .path_arg(&signature)
            .path_arg(&archive);
        services.runner.run(&cmd).map_err(|e| {
            CoreError::Step(format!(
                "Error verifying signature of {}: {e}",
                archive.display()
            ))
        })?;
    }

    info!("extracting {} into the chroot", archive.display());
    unpack_tarball(&archive, &machine.ctx.chroot_dir)?;
    Ok(())
}
