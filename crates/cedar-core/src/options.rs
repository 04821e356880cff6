use cedar_store::DEFAULT_SECTOR_SIZE;
use std::fmt;
use std::path::PathBuf;

/// How the seeding tool treats validation sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Ignore,
    Enforce,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Ignore => write!(f, "ignore"),
            Validation::Enforce => write!(f, "enforce"),
        }
    }
}

/// Options shared by every build variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonOptions {
    pub debug: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub dry_run: bool,
    pub channel: Option<String>,
    pub validation: Option<Validation>,
    /// Where artifacts are written. Defaults to the current directory.
    pub output_dir: Option<PathBuf>,
    pub sector_size: u64,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            debug: false,
            verbose: false,
            quiet: false,
            dry_run: false,
            channel: None,
            validation: None,
            output_dir: None,
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

/// Options that steer the state machine itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineOptions {
    /// Stop before running this step.
    pub until: Option<String>,
    /// Stop after running this step.
    pub thru: Option<String>,
    pub resume: bool,
    /// A user-supplied work directory. When unset the machine creates and
    /// owns a temporary one.
    pub work_dir: Option<PathBuf>,
}
