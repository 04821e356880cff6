//! Orchestration engine for cedar image builds.
//!
//! This crate plans a build definition into an ordered list of named steps
//! and drives them through a resumable state machine. `StateMachine` is the
//! shared helper every build variant holds as a field; `ClassicBuild` is the
//! classic-image variant and owns the step implementations under `steps`.
//! Each variant implements `Engine`, which the CLI drives through `execute`.

pub mod classic;
pub mod engine;
pub mod lifecycle;
pub mod machine;
pub mod options;
pub mod plan;
pub mod steps;

pub use classic::{ClassicBuild, Services};
pub use engine::{execute, run_and_teardown, Engine};
pub use lifecycle::{validate_transition, MachineState};
pub use machine::{run_steps, StateMachine, Step, Variant};
pub use options::{CommonOptions, MachineOptions, Validation};
pub use plan::{host_needs, plan, step_names, RootfsSource};

use cedar_runtime::RuntimeError;
use cedar_schema::DefinitionError;
use cedar_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error resuming: checkpoint records {taken} completed steps but only {planned} are planned")]
    Resume { taken: usize, planned: usize },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{0}")]
    Step(String),
    /// A failure followed by a cleanup that failed as well.
    #[error("{error}\n{cleanup}")]
    Cleanup {
        error: Box<CoreError>,
        cleanup: Box<CoreError>,
    },
}

impl CoreError {
    /// Join `cleanup` onto `self`, keeping both.
    #[must_use]
    pub fn join(self, cleanup: CoreError) -> Self {
        CoreError::Cleanup {
            error: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// The error that started a chain of joined failures.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::Cleanup { error, .. } => error.root(),
            other => other,
        }
    }
}

/// Join two optional failures without dropping either.
pub(crate) fn join_results(
    first: Result<(), CoreError>,
    second: Result<(), CoreError>,
) -> Result<(), CoreError> {
    match (first, second) {
        (Ok(()), second) => second,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(c)) => Err(e.join(c)),
    }
}
