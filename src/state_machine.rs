//! Pure state-transition functions for rooms and recordings (§4.1).
//!
//! These functions never touch the database or the WebSocket fabric — they
//! take the current state plus a trigger and return either the next state
//! or a typed error. Callers (handlers) are responsible for persisting the
//! result through C2 and broadcasting through C4.

use crate::models::{RecordingState, RoomState};
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCommand {
    Start,
    Stop,
    Reset,
}

impl RoomCommand {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Apply a director command to a room's current state (idle → recording →
/// finalizing → finished, with a single `finished → idle` loop-back).
///
/// The `finalizing → finished` arm is driven by the "all guests synced"
/// predicate rather than a direct command and is handled separately by
/// [`advance_to_finished`].
pub fn apply_room_command(
    current: RoomState,
    command: RoomCommand,
) -> Result<RoomState, AppError> {
    match (current, command) {
        (RoomState::Idle, RoomCommand::Start) => Ok(RoomState::Recording),
        (RoomState::Recording, RoomCommand::Stop) => Ok(RoomState::Finalizing),
        (RoomState::Finished, RoomCommand::Reset) => Ok(RoomState::Idle),
        _ => Err(AppError::InvalidStateTransition(format!(
            "cannot apply {:?} while room is {}",
            command,
            current.as_str()
        ))),
    }
}

/// Transition a room from `finalizing` to `finished` once the all-synced
/// predicate holds. Illegal outside `finalizing`.
pub fn advance_to_finished(current: RoomState) -> Result<RoomState, AppError> {
    if current != RoomState::Finalizing {
        return Err(AppError::InvalidStateTransition(format!(
            "room must be finalizing to finish, was {}",
            current.as_str()
        )));
    }
    Ok(RoomState::Finished)
}

/// Validate a direct recording-state transition request (used by
/// `PATCH /recordings/:id/state`). Only forward moves along
/// `standby → recording → finalizing → synced` are legal; `interrupted` is
/// reserved and not reachable through this path (§9 open question).
pub fn apply_recording_transition(
    current: RecordingState,
    target: RecordingState,
) -> Result<RecordingState, AppError> {
    use RecordingState::*;
    let legal = matches!(
        (current, target),
        (Standby, Recording) | (Recording, Finalizing) | (Finalizing, Synced)
    );
    if !legal {
        return Err(AppError::InvalidStateTransition(format!(
            "cannot move recording from {} to {}",
            current.as_str(),
            target.as_str()
        )));
    }
    Ok(target)
}

/// Metadata mutation is allowed only while the recording hasn't started
/// finalizing.
pub fn can_mutate_metadata(state: RecordingState) -> bool {
    matches!(state, RecordingState::Standby | RecordingState::Recording)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_happy_path() {
        let mut state = RoomState::Idle;
        state = apply_room_command(state, RoomCommand::Start).unwrap();
        assert_eq!(state, RoomState::Recording);
        state = apply_room_command(state, RoomCommand::Stop).unwrap();
        assert_eq!(state, RoomState::Finalizing);
        state = advance_to_finished(state).unwrap();
        assert_eq!(state, RoomState::Finished);
        state = apply_room_command(state, RoomCommand::Reset).unwrap();
        assert_eq!(state, RoomState::Idle);
    }

    #[test]
    fn room_rejects_illegal_transitions() {
        assert!(apply_room_command(RoomState::Idle, RoomCommand::Stop).is_err());
        assert!(apply_room_command(RoomState::Recording, RoomCommand::Start).is_err());
        assert!(apply_room_command(RoomState::Finalizing, RoomCommand::Reset).is_err());
        assert!(advance_to_finished(RoomState::Idle).is_err());
    }

    #[test]
    fn recording_happy_path() {
        use RecordingState::*;
        assert_eq!(
            apply_recording_transition(Standby, Recording).unwrap(),
            Recording
        );
        assert_eq!(
            apply_recording_transition(Recording, Finalizing).unwrap(),
            Finalizing
        );
        assert_eq!(
            apply_recording_transition(Finalizing, Synced).unwrap(),
            Synced
        );
    }

    #[test]
    fn recording_rejects_skips_and_regressions() {
        use RecordingState::*;
        assert!(apply_recording_transition(Standby, Finalizing).is_err());
        assert!(apply_recording_transition(Synced, Recording).is_err());
        assert!(apply_recording_transition(Standby, Standby).is_err());
    }

    #[test]
    fn metadata_mutation_window() {
        assert!(can_mutate_metadata(RecordingState::Standby));
        assert!(can_mutate_metadata(RecordingState::Recording));
        assert!(!can_mutate_metadata(RecordingState::Finalizing));
        assert!(!can_mutate_metadata(RecordingState::Synced));
    }
}
