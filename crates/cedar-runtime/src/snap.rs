use crate::command::{run_all, CommandRunner, CommandSpec, HostRunner};
use crate::RuntimeError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inputs for staging snaps into a classic root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    pub root: PathBuf,
    pub architecture: String,
    /// Snap names in staging order.
    pub snaps: Vec<String>,
    pub channels: BTreeMap<String, String>,
    /// Pinned revisions, keyed by snap name.
    pub revisions: BTreeMap<String, u32>,
    /// Fallback channel for snaps without an explicit one.
    pub default_channel: Option<String>,
    /// `ignore` or `enforce`, passed through to the seeding tool.
    pub validation: Option<String>,
    /// Where helper files such as the revision manifest may be written.
    pub scratch_dir: PathBuf,
}

/// Capability for package and snap acquisition in a target root.
pub trait SnapInstaller: Send + Sync {
    fn install_packages(&self, root: &Path, packages: &[String]) -> Result<(), RuntimeError>;

    /// Snaps already seeded in `root`, mapped to the channel they came from.
    fn seeded_snaps(&self, root: &Path) -> Result<BTreeMap<String, String>, RuntimeError>;

    fn prepare(&self, opts: &PrepareOptions) -> Result<(), RuntimeError>;
}

/// Split `name` or `name=channel`.
pub fn parse_snap_spec(spec: &str) -> Result<(String, Option<String>), RuntimeError> {
    match spec.split('=').collect::<Vec<_>>().as_slice() {
        [name] => Ok(((*name).to_owned(), None)),
        [name, channel] => Ok(((*name).to_owned(), Some((*channel).to_owned()))),
        _ => Err(RuntimeError::InvalidSnap(format!(
            "{spec}. Argument must be in the form name or name=channel"
        ))),
    }
}

pub fn seed_dir(root: &Path) -> PathBuf {
    root.join("var/lib/snapd/seed")
}

#[derive(Debug, Deserialize)]
struct SeedYaml {
    #[serde(default)]
    snaps: Vec<SeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    name: String,
    #[serde(default)]
    channel: Option<String>,
}

/// Drives `apt-get` inside the root and `snap prepare-image` on the host.
pub struct SnapdInstaller<R: CommandRunner = HostRunner> {
    runner: R,
}

impl SnapdInstaller {
    pub fn new() -> Self {
        Self { runner: HostRunner }
    }
}

impl Default for SnapdInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> SnapdInstaller<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    fn write_revisions(&self, opts: &PrepareOptions) -> Result<Option<PathBuf>, RuntimeError> {
        if opts.revisions.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&opts.scratch_dir)?;
        let path = opts.scratch_dir.join("seed.manifest");
        let content: String = opts
            .revisions
            .iter()
            .map(|(name, rev)| format!("{name} {rev}\n"))
            .collect();
        fs::write(&path, content)?;
        Ok(Some(path))
    }
}

impl<R: CommandRunner> SnapInstaller for SnapdInstaller<R> {
    fn install_packages(&self, root: &Path, packages: &[String]) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("installing {} packages", packages.len());
        let update = CommandSpec::new("chroot")
            .path_arg(root)
            .args(["apt-get", "update"]);
        let install = CommandSpec::new("chroot")
            .path_arg(root)
            .args(["env", "DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y"])
            .args(packages.iter().map(String::as_str));
        run_all(&self.runner, &[update, install])?;
        Ok(())
    }

    fn seeded_snaps(&self, root: &Path) -> Result<BTreeMap<String, String>, RuntimeError> {
        let path = seed_dir(root).join("seed.yaml");
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let seed: SeedYaml = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        Ok(seed
            .snaps
            .into_iter()
            .map(|s| (s.name, s.channel.unwrap_or_default()))
            .collect())
    }

    fn prepare(&self, opts: &PrepareOptions) -> Result<(), RuntimeError> {
        let mut cmd = CommandSpec::new("snap")
            .args(["prepare-image", "--classic", "--arch"])
            .arg(opts.architecture.as_str());
        if let Some(channel) = &opts.default_channel {
            cmd = cmd.arg("--channel").arg(channel.as_str());
        }
        if let Some(validation) = &opts.validation {
            cmd = cmd.arg(format!("--validation={validation}"));
        }
        if let Some(manifest) = self.write_revisions(opts)? {
            cmd = cmd.arg("--revisions").path_arg(&manifest);
        }
        for snap in &opts.snaps {
            let arg = match opts.channels.get(snap) {
                Some(channel) if !channel.is_empty() => format!("{snap}={channel}"),
                _ => snap.clone(),
            };
            cmd = cmd.arg("--snap").arg(arg);
        }
        cmd = cmd.path_arg(&opts.root);

        debug!("staging {} snaps into {}", opts.snaps.len(), opts.root.display());
        self.runner.run(&cmd)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingRunner;

    #[test]
    fn parse_snap_spec_forms() {
        assert_eq!(parse_snap_spec("lxd").unwrap(), ("lxd".to_owned(), None));
        assert_eq!(
            parse_snap_spec("lxd=5.21/stable").unwrap(),
            ("lxd".to_owned(), Some("5.21/stable".to_owned()))
        );
        assert!(matches!(
            parse_snap_spec("lxd=a=b"),
            Err(RuntimeError::InvalidSnap(_))
        ));
    }

    #[test]
    fn prepare_builds_snap_command() {
        let dir = tempfile::tempdir().unwrap();
        let installer = SnapdInstaller::with_runner(RecordingRunner::new());
        let mut opts = PrepareOptions {
            root: PathBuf::from("/work/chroot"),
            architecture: "amd64".to_owned(),
            snaps: vec!["core22".to_owned(), "hello".to_owned()],
            default_channel: Some("edge".to_owned()),
            validation: Some("enforce".to_owned()),
            scratch_dir: dir.path().to_path_buf(),
            ..PrepareOptions::default()
        };
        opts.channels.insert("hello".to_owned(), "beta".to_owned());
        opts.revisions.insert("hello".to_owned(), 42);

        installer.prepare(&opts).unwrap();

        let manifest = dir.path().join("seed.manifest");
        assert_eq!(fs::read_to_string(&manifest).unwrap(), "hello 42\n");
        assert_eq!(
            installer.runner.calls(),
            vec![format!(
                "snap prepare-image --classic --arch amd64 --channel edge --validation=enforce \
                 --revisions {} --snap core22 --snap hello=beta /work/chroot",
                manifest.display()
            )]
        );
    }

    #[test]
    fn seeded_snaps_reads_seed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let seed = seed_dir(dir.path());
        fs::create_dir_all(&seed).unwrap();
        fs::write(
            seed.join("seed.yaml"),
            "snaps:\n  - name: core22\n    channel: stable\n    file: core22_1122.snap\n  - name: lxd\n    file: lxd_1.snap\n",
        )
        .unwrap();

        let seeded = SnapdInstaller::new().seeded_snaps(dir.path()).unwrap();
        assert_eq!(seeded.get("core22").map(String::as_str), Some("stable"));
        assert_eq!(seeded.get("lxd").map(String::as_str), Some(""));
    }

    #[test]
    fn install_packages_skips_empty_list() {
        let installer = SnapdInstaller::with_runner(RecordingRunner::new());
        installer.install_packages(Path::new("/c"), &[]).unwrap();
        assert!(installer.runner.calls().is_empty());
        installer
            .install_packages(Path::new("/c"), &["vim".to_owned()])
            .unwrap();
        assert_eq!(
            installer.runner.calls(),
            vec![
                "chroot /c apt-get update",
                "chroot /c env DEBIAN_FRONTEND=noninteractive apt-get install -y vim",
            ]
        );
    }
}
