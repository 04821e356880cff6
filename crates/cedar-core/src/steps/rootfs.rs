use super::{apt, in_root, resolve_source};
use crate::classic::ClassicBuild;
use crate::CoreError;
use cedar_runtime::CommandSpec;
use regex::Regex;
use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_LOCALE: &str = "# Default Ubuntu locale\nLANG=C.UTF-8\n";
const NOCLOUD_DATASOURCE: &str = "\
# configure cloud-init for NoCloud
datasource_list: [ NoCloud, None ]
";

/// Seed cloud-init's NoCloud datasource with the definition's data.
/// NoCloud needs both meta-data and user-data, so absent ones are written
/// empty.
pub(crate) fn customize_cloud_init(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, _, machine) = build.parts()?;
    let Some(cloud_init) = def.customization.as_ref().and_then(|c| c.cloud_init.as_ref()) else {
        return Ok(());
    };
    let chroot = &machine.ctx.chroot_dir;
    let seed = chroot.join("var/lib/cloud/seed/nocloud");
    fs::create_dir_all(&seed)?;

    let files = [
        ("meta-data", Some(cloud_init.meta_data.as_deref().unwrap_or_default())),
        ("user-data", Some(cloud_init.user_data.as_deref().unwrap_or_default())),
        ("network-config", cloud_init.network_config.as_deref()),
    ];
    for (name, content) in files {
        if let Some(content) = content {
            let path = seed.join(name);
            fs::write(&path, content).map_err(|e| {
                CoreError::Step(format!("Error writing {}: {e}", path.display()))
            })?;
        }
    }

    let cfg = chroot.join("etc/cloud/cloud.cfg.d");
    fs::create_dir_all(&cfg)?;
    fs::write(cfg.join("99_cedar_nocloud.cfg"), NOCLOUD_DATASOURCE)?;
    Ok(())
}

/// Apply the definition's manual customizations inside the chroot.
pub(crate) fn customize_manual(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let Some(manual) = def.manual() else {
        return Ok(());
    };
    let chroot = machine.ctx.chroot_dir.clone();

    for dir in &manual.mkdir {
        let path = in_root(&chroot, &dir.path);
        fs::create_dir_all(&path)?;
        fs::set_permissions(&path, Permissions::from_mode(dir.permissions))?;
    }
    for copy in &manual.copy_file {
        let source = resolve_source(&copy.source, machine.conf_def_dir());
        let dest = in_root(&chroot, &copy.destination);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &dest).map_err(|e| {
            CoreError::Step(format!(
                "Error copying {} to {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
    }
    for touch in &manual.touch_file {
        let path = in_root(&chroot, &touch.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
    }
    for exec in &manual.execute {
        let cmd = CommandSpec::new("chroot")
            .path_arg(&chroot)
            .arg(exec.path.as_str());
        services.runner.run(&cmd)?;
    }
    Ok(())
}

fn locale_configured(content: &str) -> Result<bool, CoreError> {
    let re = Regex::new(r"(?m)^LANG=|LC_[A-Z_]+=")
        .map_err(|e| CoreError::Step(format!("invalid locale pattern: {e}")))?;
    Ok(re.is_match(content))
}

/// Default to `C.UTF-8` unless a customization already chose a locale.
pub(crate) fn set_default_locale(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let default_dir = build.machine.ctx.chroot_dir.join("etc").join("default");
    let locale = default_dir.join("locale");
    if let Ok(content) = fs::read_to_string(&locale) {
        if locale_configured(&content)? {
            debug!("locale already set in {}", locale.display());
            return Ok(());
        }
    }

    fs::create_dir_all(&default_dir)
        .map_err(|e| CoreError::Step(format!("Error creating default directory: {e}")))?;
    fs::write(&locale, DEFAULT_LOCALE)
        .map_err(|e| CoreError::Step(format!("Error writing to locale file: {e}")))?;
    Ok(())
}

fn matching(root: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>, CoreError> {
    let root = root
        .to_str()
        .ok_or_else(|| CoreError::Step(format!("{} is not valid UTF-8", root.display())))?;
    let base = glob::Pattern::escape(root);
    let mut files = Vec::new();
    for pattern in patterns {
        let paths = glob::glob(&format!("{base}/{pattern}")).map_err(|e| {
            CoreError::Step(format!("unable to list files for pattern {pattern}: {e}"))
        })?;
        for path in paths {
            files.push(path.map_err(|e| CoreError::Io(e.into_error()))?);
        }
    }
    Ok(files)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove(path: &Path) -> Result<(), CoreError> {
    let result = match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    ignore_missing(result)
        .map_err(|e| CoreError::Step(format!("Error removing {}: {e}", path.display())))
}

fn truncate(path: &Path) -> Result<(), CoreError> {
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_len(0));
    ignore_missing(result)
        .map_err(|e| CoreError::Step(format!("Error truncating {}: {e}", path.display())))
}

/// Strip host-specific secrets and identifiers left behind by earlier steps,
/// and disable the PPAs that should not stay enabled.
pub(crate) fn clean_rootfs(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, _, machine) = build.parts()?;
    let chroot = machine.ctx.chroot_dir.clone();
    apt::remove_disabled_ppas(def, &chroot)?;

    let mut to_delete = vec![chroot.join("var/lib/dbus/machine-id")];
    to_delete.extend(matching(
        &chroot,
        &[
            "etc/ssh/ssh_host_*_key.pub",
            "etc/ssh/ssh_host_*_key",
            "var/cache/debconf/*-old",
            "var/lib/dpkg/*-old",
            "dev/*",
            "sys/*",
            "run/*",
        ],
    )?);
    for path in &to_delete {
        remove(path)?;
    }

    let mut to_truncate = vec![chroot.join("etc/machine-id")];
    to_truncate.extend(matching(&chroot, &["etc/udev/rules.d/*persistent-net.rules"])?);
    for path in &to_truncate {
        truncate(path)?;
    }
    Ok(())
}
