pub mod build;
pub mod validate;

use cedar_core::CoreError;
use cedar_store::StoreError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DEFINITION_ERROR: u8 = 2;
pub const EXIT_CONFIG_ERROR: u8 = 3;
pub const EXIT_RESUME_ERROR: u8 = 4;

/// A command failure and the exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self::new(exit_code(&err), err.to_string())
    }
}

/// Exit code for the error that started a failure chain.
pub fn exit_code(err: &CoreError) -> u8 {
    match err.root() {
        CoreError::Config(_) => EXIT_CONFIG_ERROR,
        CoreError::Definition(_) => EXIT_DEFINITION_ERROR,
        CoreError::Resume { .. }
        | CoreError::Store(
            StoreError::CheckpointNotFound(_)
            | StoreError::CorruptCheckpoint(_)
            | StoreError::VersionMismatch { .. },
        ) => EXIT_RESUME_ERROR,
        _ => EXIT_FAILURE,
    }
}
