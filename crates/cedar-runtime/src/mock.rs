use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::layout::{GadgetLayout, VolumeWriteRequest};
use crate::snap::{seed_dir, PrepareOptions, SnapInstaller};
use crate::RuntimeError;
use cedar_schema::GadgetInfo;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Records every command instead of running it.
///
/// Commands whose rendered line contains one of the `fail_on` patterns
/// return `CommandFailed`. Successful commands may be given canned stdout.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    fail_on: Vec<String>,
    stdout: BTreeMap<String, String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(patterns: &[&str]) -> Self {
        Self {
            fail_on: patterns.iter().map(|p| (*p).to_owned()).collect(),
            ..Self::default()
        }
    }

    /// Return `stdout` for commands whose program is `program`.
    #[must_use]
    pub fn with_stdout(mut self, program: &str, stdout: &str) -> Self {
        self.stdout.insert(program.to_owned(), stdout.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, RuntimeError> {
        let line = cmd.to_string();
        lock(&self.calls).push(line.clone());
        if self.fail_on.iter().any(|p| line.contains(p.as_str())) {
            return Err(RuntimeError::CommandFailed {
                command: line,
                status: "exit 1".to_owned(),
                output: "scripted failure".to_owned(),
            });
        }
        Ok(CommandOutput {
            stdout: self.stdout.get(&cmd.program).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

/// Snap installer that records requests and fakes a seed on `prepare`.
#[derive(Default)]
pub struct MockInstaller {
    prepared: Mutex<Vec<PrepareOptions>>,
    installed: Mutex<Vec<String>>,
    seeded: BTreeMap<String, String>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `root` already carries these seeded snaps.
    #[must_use]
    pub fn with_seeded(mut self, snaps: &[(&str, &str)]) -> Self {
        self.seeded = snaps
            .iter()
            .map(|(n, c)| ((*n).to_owned(), (*c).to_owned()))
            .collect();
        self
    }

    pub fn prepared(&self) -> Vec<PrepareOptions> {
        lock(&self.prepared).clone()
    }

    pub fn installed(&self) -> Vec<String> {
        lock(&self.installed).clone()
    }
}

impl SnapInstaller for MockInstaller {
    fn install_packages(&self, _root: &Path, packages: &[String]) -> Result<(), RuntimeError> {
        lock(&self.installed).extend(packages.iter().cloned());
        Ok(())
    }

    fn seeded_snaps(&self, _root: &Path) -> Result<BTreeMap<String, String>, RuntimeError> {
        Ok(self.seeded.clone())
    }

    fn prepare(&self, opts: &PrepareOptions) -> Result<(), RuntimeError> {
        let snaps_dir = seed_dir(&opts.root).join("snaps");
        fs::create_dir_all(&snaps_dir)?;
        for (i, snap) in opts.snaps.iter().enumerate() {
            let rev = opts.revisions.get(snap).copied().unwrap_or(i as u32 + 1);
            fs::write(snaps_dir.join(format!("{snap}_{rev}.snap")), b"")?;
        }
        lock(&self.prepared).push(opts.clone());
        Ok(())
    }
}

/// Gadget layout that returns a fixed layout and writes sparse images.
pub struct MockGadgetLayout {
    info: GadgetInfo,
    written: Mutex<Vec<PathBuf>>,
}

impl MockGadgetLayout {
    pub fn new(info: GadgetInfo) -> Self {
        Self {
            info,
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn written(&self) -> Vec<PathBuf> {
        lock(&self.written).clone()
    }
}

impl GadgetLayout for MockGadgetLayout {
    fn layout(&self, gadget_yaml: &Path, _sector_size: u64) -> Result<GadgetInfo, RuntimeError> {
        if !gadget_yaml.exists() {
            return Err(RuntimeError::Gadget(format!(
                "{} does not exist",
                gadget_yaml.display()
            )));
        }
        Ok(self.info.clone())
    }

    fn write_volume(&self, req: &VolumeWriteRequest<'_>) -> Result<(), RuntimeError> {
        let file = fs::File::create(req.image_path)?;
        file.set_len(req.size)?;
        lock(&self.written).push(req.image_path.to_path_buf());
        Ok(())
    }
}
