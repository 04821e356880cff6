use crate::CoreError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Created,
    Planned,
    Running,
    Completed,
    Failed,
    TornDown,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::Created => "created",
            MachineState::Planned => "planned",
            MachineState::Running => "running",
            MachineState::Completed => "completed",
            MachineState::Failed => "failed",
            MachineState::TornDown => "torn-down",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: MachineState, to: MachineState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (MachineState::Created, MachineState::Planned)
            // a dry run completes without ever running
            | (MachineState::Planned, MachineState::Running | MachineState::Completed)
            | (MachineState::Running, MachineState::Completed | MachineState::Failed)
            | (
                MachineState::Planned | MachineState::Completed | MachineState::Failed,
                MachineState::TornDown
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
