use crate::engine::Engine;
use crate::machine::{run_steps, StateMachine, Variant};
use crate::options::{CommonOptions, MachineOptions};
use crate::plan::{host_needs, plan, RootfsSource};
use crate::CoreError;
use cedar_runtime::{
    BuildNeeds, CommandRunner, GadgetLayout, HostRunner, SnapInstaller, SnapdInstaller,
    YamlGadgetLayout,
};
use cedar_schema::{load_definition, BuildDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Host capabilities a build reaches through.
#[derive(Clone)]
pub struct Services {
    pub runner: Arc<dyn CommandRunner>,
    pub installer: Arc<dyn SnapInstaller>,
    pub gadget: Arc<dyn GadgetLayout>,
}

impl Services {
    /// Capabilities backed by the real host tools.
    pub fn host() -> Self {
        Self {
            runner: Arc::new(HostRunner),
            installer: Arc::new(SnapdInstaller::new()),
            gadget: Arc::new(YamlGadgetLayout::new()),
        }
    }
}

/// Builds a classic image from a YAML build definition.
pub struct ClassicBuild {
    pub(crate) machine: StateMachine<ClassicBuild>,
    definition_path: PathBuf,
    pub(crate) definition: Option<BuildDefinition>,
    pub(crate) services: Services,
    preseed: bool,
    image_path: Option<PathBuf>,
}

impl ClassicBuild {
    pub fn new(
        common: CommonOptions,
        opts: MachineOptions,
        definition_path: impl Into<PathBuf>,
        services: Services,
    ) -> Self {
        Self {
            machine: StateMachine::new(common, opts),
            definition_path: definition_path.into(),
            definition: None,
            services,
            preseed: false,
            image_path: None,
        }
    }

    /// Preseed the image even if the definition does not ask for it.
    #[must_use]
    pub fn with_preseed(mut self, preseed: bool) -> Self {
        self.preseed = preseed;
        self
    }

    /// Customize the tree at `path` in place instead of creating a chroot.
    #[must_use]
    pub fn with_image_path(mut self, path: Option<PathBuf>) -> Self {
        self.image_path = path;
        self
    }

    /// Where the chroot comes from. `None` before setup.
    pub fn rootfs_source(&self) -> Option<RootfsSource> {
        self.definition
            .as_ref()
            .map(|def| RootfsSource::select(def, self.image_path.is_some()))
    }

    pub fn definition(&self) -> Result<&BuildDefinition, CoreError> {
        self.definition
            .as_ref()
            .ok_or_else(|| CoreError::Step("build definition has not been loaded".to_owned()))
    }

    /// Host tools the planned steps will call. `None` before setup.
    pub fn build_needs(&self) -> Option<BuildNeeds> {
        let source = self.rootfs_source()?;
        self.definition.as_ref().map(|def| host_needs(def, source))
    }

    /// Split borrows for step implementations.
    pub(crate) fn parts(
        &mut self,
    ) -> Result<(&BuildDefinition, &Services, &mut StateMachine<ClassicBuild>), CoreError> {
        let definition = self
            .definition
            .as_ref()
            .ok_or_else(|| CoreError::Step("build definition has not been loaded".to_owned()))?;
        Ok((definition, &self.services, &mut self.machine))
    }
}

/// Absolute form of a user-supplied image tree, which must be a directory.
fn existing_tree(path: &Path) -> Result<PathBuf, CoreError> {
    match fs::canonicalize(path) {
        Ok(abs) if abs.is_dir() => Ok(abs),
        Ok(_) => Err(CoreError::Config(format!(
            "image path {} is not a directory",
            path.display()
        ))),
        Err(e) => Err(CoreError::Config(format!(
            "image path {} is not accessible: {e}",
            path.display()
        ))),
    }
}

impl Variant for ClassicBuild {
    fn machine(&self) -> &StateMachine<Self> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<Self> {
        &mut self.machine
    }
}

impl Engine for ClassicBuild {
    fn setup(&mut self) -> Result<(), CoreError> {
        self.machine.set_conf_def_dir(&self.definition_path)?;
        self.machine.validate_input()?;
        self.image_path = self.image_path.as_deref().map(existing_tree).transpose()?;

        let mut definition = load_definition(&self.definition_path)?;
        if self.preseed {
            definition
                .customization
                .get_or_insert_with(Default::default)
                .preseed = true;
        }
        info!(
            "building {} ({}) for {}",
            definition.display_name(),
            definition.architecture,
            definition.series
        );
        let source = RootfsSource::select(&definition, self.image_path.is_some());
        self.machine.set_steps(plan(&definition, source))?;
        self.definition = Some(definition);

        self.machine.validate_until_thru()?;
        if self.machine.opts.resume {
            self.machine.resume()?;
        }
        self.set_series()?;
        self.machine.display_steps();

        if self.machine.common.dry_run {
            return Ok(());
        }
        self.machine.make_work_dirs()?;
        if let Some(path) = &self.image_path {
            self.machine.ctx.chroot_dir.clone_from(path);
        }
        self.machine.determine_output_dir()
    }

    fn run(&mut self) -> Result<(), CoreError> {
        run_steps(self)
    }

    fn teardown(&mut self) -> Result<(), CoreError> {
        self.machine.teardown()
    }

    fn set_series(&mut self) -> Result<(), CoreError> {
        let series = self.definition()?.series.clone();
        self.machine.set_series(&series);
        Ok(())
    }
}
