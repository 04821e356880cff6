use crate::lifecycle::{validate_transition, MachineState};
use crate::options::{CommonOptions, MachineOptions};
use crate::CoreError;
use cedar_store::{BuildContext, CheckpointStore, WorkLayout};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

/// One named unit of build work, run against the variant that planned it.
pub struct Step<V> {
    pub name: &'static str,
    pub run: fn(&mut V) -> Result<(), CoreError>,
}

impl<V> Step<V> {
    pub const fn new(name: &'static str, run: fn(&mut V) -> Result<(), CoreError>) -> Self {
        Self { name, run }
    }
}

impl<V> Clone for Step<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Step<V> {}

impl<V> fmt::Debug for Step<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Step").field(&self.name).finish()
    }
}

/// A build variant that holds a [`StateMachine`] over itself.
pub trait Variant: Sized {
    fn machine(&self) -> &StateMachine<Self>;
    fn machine_mut(&mut self) -> &mut StateMachine<Self>;
}

/// Orchestration state shared by every build variant.
///
/// Holds the flags, the pending step list, the [`BuildContext`] the steps
/// mutate, and the work directory. A variant owns one of these as a field
/// and passes itself to [`run_steps`].
pub struct StateMachine<V> {
    pub common: CommonOptions,
    pub opts: MachineOptions,
    pub ctx: BuildContext,
    steps: Vec<Step<V>>,
    state: MachineState,
    scratch: Option<TempDir>,
    owns_work_dir: bool,
    resumed: bool,
    conf_def_dir: PathBuf,
    output_dir: PathBuf,
    series: String,
}

impl<V> StateMachine<V> {
    pub fn new(common: CommonOptions, opts: MachineOptions) -> Self {
        let ctx = BuildContext::new(&WorkLayout::new(PathBuf::new()), common.sector_size);
        Self {
            common,
            opts,
            ctx,
            steps: Vec::new(),
            state: MachineState::Created,
            scratch: None,
            owns_work_dir: false,
            resumed: false,
            conf_def_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            series: String::new(),
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    fn transition(&mut self, to: MachineState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("machine {} -> {to}", self.state);
        self.state = to;
        Ok(())
    }

    /// Reject flag combinations that can never produce a valid build.
    pub fn validate_input(&self) -> Result<(), CoreError> {
        if self.opts.until.is_some() && self.opts.thru.is_some() {
            return Err(CoreError::Config(
                "cannot specify both --until and --thru".to_owned(),
            ));
        }
        if self.opts.resume && self.opts.work_dir.is_none() {
            return Err(CoreError::Config(
                "must specify workdir when using --resume flag".to_owned(),
            ));
        }
        let levels = [self.common.quiet, self.common.verbose, self.common.debug];
        if levels.iter().filter(|set| **set).count() > 1 {
            return Err(CoreError::Config(
                "--quiet, --verbose, and --debug flags are mutually exclusive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Remember the absolute directory holding the definition file, against
    /// which relative paths inside the definition are resolved.
    pub fn set_conf_def_dir(&mut self, definition: &Path) -> Result<(), CoreError> {
        let parent = definition.parent().unwrap_or_else(|| Path::new(""));
        self.conf_def_dir = if parent.is_absolute() {
            parent.to_path_buf()
        } else {
            env::current_dir()
                .map_err(|e| {
                    CoreError::Config(format!(
                        "unable to determine the configuration definition directory: {e}"
                    ))
                })?
                .join(parent)
        };
        Ok(())
    }

    pub fn conf_def_dir(&self) -> &Path {
        &self.conf_def_dir
    }

    /// Install the planned steps. Moves the machine to `Planned`.
    pub fn set_steps(&mut self, steps: Vec<Step<V>>) -> Result<(), CoreError> {
        self.transition(MachineState::Planned)?;
        self.steps = steps;
        Ok(())
    }

    /// Names of the steps that have not run yet, in order.
    pub fn pending(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Check that `--until` and `--thru` name a planned step.
    pub fn validate_until_thru(&self) -> Result<(), CoreError> {
        for bound in [&self.opts.until, &self.opts.thru].into_iter().flatten() {
            if !self.steps.iter().any(|s| s.name == bound) {
                return Err(CoreError::Config(format!(
                    "state {bound} is not a valid state name"
                )));
            }
        }
        Ok(())
    }

    /// Load the checkpoint from the work directory and drop the steps it
    /// records as done.
    pub fn resume(&mut self) -> Result<(), CoreError> {
        let work_dir = self.opts.work_dir.clone().ok_or_else(|| {
            CoreError::Config("must specify workdir when using --resume flag".to_owned())
        })?;
        let ctx = CheckpointStore::new(WorkLayout::new(work_dir)).read()?;
        if ctx.steps_taken > self.steps.len() {
            return Err(CoreError::Resume {
                taken: ctx.steps_taken,
                planned: self.steps.len(),
            });
        }
        self.steps.drain(..ctx.steps_taken);
        info!(
            "resuming after {} completed steps at {}",
            ctx.steps_taken,
            ctx.work_dir.display()
        );
        self.ctx = ctx;
        self.resumed = true;
        Ok(())
    }

    pub fn set_series(&mut self, series: &str) {
        self.series = series.to_owned();
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    /// The plan as printed before a build, honouring `--until`/`--thru`.
    pub fn planned_lines(&self) -> Vec<String> {
        let verb = if self.common.dry_run { "would" } else { "will" };
        let mut lines = vec![format!("\nFollowing steps {verb} be executed:")];
        for (i, step) in self.steps.iter().enumerate() {
            if self.opts.until.as_deref() == Some(step.name) {
                break;
            }
            lines.push(format!("[{}] {}", self.ctx.steps_taken + i, step.name));
            if self.opts.thru.as_deref() == Some(step.name) {
                break;
            }
        }
        if !self.common.dry_run {
            lines.push("\nContinuing".to_owned());
        }
        lines
    }

    pub fn display_steps(&self) {
        if self.common.debug || self.common.verbose || self.common.dry_run {
            for line in self.planned_lines() {
                println!("{line}");
            }
        }
    }

    /// Create the work directory tree. Without a user-supplied work
    /// directory a temporary one is created and owned by the machine.
    pub fn make_work_dirs(&mut self) -> Result<(), CoreError> {
        let root = match &self.opts.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => {
                let dir = tempfile::Builder::new().prefix("cedar-").tempdir()?;
                let path = dir.path().to_path_buf();
                self.scratch = Some(dir);
                self.owns_work_dir = true;
                path
            }
        };
        let layout = WorkLayout::new(&root);
        layout.initialize()?;
        if !self.resumed {
            self.ctx = BuildContext::new(&layout, self.common.sector_size);
        }
        debug!("work directory {}", root.display());
        Ok(())
    }

    pub fn determine_output_dir(&mut self) -> Result<(), CoreError> {
        let dir = match &self.common.output_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };
        fs::create_dir_all(&dir)?;
        self.output_dir = dir;
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn owns_work_dir(&self) -> bool {
        self.owns_work_dir
    }

    /// Remove a machine-owned work directory. User directories are left alone.
    pub fn cleanup(&mut self) -> Result<(), CoreError> {
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            dir.close().map_err(|e| {
                CoreError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Error cleaning up workDir: {e}"),
                ))
            })?;
            debug!("removed work directory {}", path.display());
        }
        Ok(())
    }

    /// Delete an owned work directory, or checkpoint progress into a
    /// user-supplied one so a later run can resume.
    pub fn teardown(&mut self) -> Result<(), CoreError> {
        validate_transition(self.state, MachineState::TornDown)?;
        let result = if self.common.dry_run {
            Ok(())
        } else if self.owns_work_dir {
            self.cleanup()
        } else {
            CheckpointStore::new(self.ctx.layout())
                .write(&self.ctx)
                .map_err(CoreError::from)
        };
        self.state = MachineState::TornDown;
        result
    }
}

/// Run the pending steps of `variant` in order.
///
/// Stops before the `--until` step and after the `--thru` step. The first
/// failing step aborts the run; an owned work directory is then removed and
/// any removal failure is joined onto the step error.
pub fn run_steps<V: Variant>(variant: &mut V) -> Result<(), CoreError> {
    if variant.machine().common.dry_run {
        return variant.machine_mut().transition(MachineState::Completed);
    }
    variant.machine_mut().transition(MachineState::Running)?;

    let mut next = 0;
    while let Some(step) = variant.machine().steps.get(next).copied() {
        next += 1;
        let machine = variant.machine_mut();
        machine.ctx.current_step = step.name.to_owned();
        if machine.opts.until.as_deref() == Some(step.name) {
            break;
        }
        if !machine.common.quiet {
            println!("[{}] {}", machine.ctx.steps_taken, step.name);
        }

        let start = Instant::now();
        let result = (step.run)(variant);
        debug!("{} duration: {:?}", step.name, start.elapsed());

        let machine = variant.machine_mut();
        if let Err(e) = result {
            machine.transition(MachineState::Failed)?;
            return Err(match machine.cleanup() {
                Ok(()) => e,
                Err(cleanup) => e.join(cleanup),
            });
        }
        machine.ctx.steps_taken += 1;
        if machine.opts.thru.as_deref() == Some(step.name) {
            break;
        }
    }

    let machine = variant.machine_mut();
    if !machine.common.quiet {
        println!("Build successful");
    }
    machine.transition(MachineState::Completed)
}
