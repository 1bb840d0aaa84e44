//! Generated gRPC bindings for the `monitoring` package (spec §6).
//!
//! Conversions to/from `serviceradar_core` types live here too, so the
//! agent and poller crates never touch `prost`-generated structs
//! directly outside the RPC boundary.

tonic::include_proto!("monitoring");

use chrono::{DateTime, Utc};
use serviceradar_core::{SweepCompletionStatus as CoreCompletionStatus, SweepState as CoreSweepState};

impl From<CoreSweepState> for SweepState {
    fn from(state: CoreSweepState) -> Self {
        match state {
            CoreSweepState::Unknown => SweepState::Unknown,
            CoreSweepState::NotStarted => SweepState::NotStarted,
            CoreSweepState::InProgress => SweepState::InProgress,
            CoreSweepState::Completed => SweepState::Completed,
            CoreSweepState::Failed => SweepState::Failed,
        }
    }
}

impl From<SweepState> for CoreSweepState {
    fn from(state: SweepState) -> Self {
        match state {
            SweepState::Unknown => CoreSweepState::Unknown,
            SweepState::NotStarted => CoreSweepState::NotStarted,
            SweepState::InProgress => CoreSweepState::InProgress,
            SweepState::Completed => CoreSweepState::Completed,
            SweepState::Failed => CoreSweepState::Failed,
        }
    }
}

impl From<CoreCompletionStatus> for SweepCompletionStatus {
    fn from(status: CoreCompletionStatus) -> Self {
        SweepCompletionStatus {
            state: SweepState::from(status.state) as i32,
            target_sequence: status.target_sequence,
            total_targets: status.total_targets,
            completed_targets: status.completed_targets,
            completion_time: status.completion_time.map(|t| t.timestamp()).unwrap_or(0),
            error_message: status.error_message.unwrap_or_default(),
        }
    }
}

impl From<SweepCompletionStatus> for CoreCompletionStatus {
    fn from(status: SweepCompletionStatus) -> Self {
        let state = SweepState::try_from(status.state)
            .unwrap_or(SweepState::Unknown)
            .into();
        CoreCompletionStatus {
            state,
            target_sequence: status.target_sequence,
            total_targets: status.total_targets,
            completed_targets: status.completed_targets,
            completion_time: if status.completion_time > 0 {
                DateTime::<Utc>::from_timestamp(status.completion_time, 0)
            } else {
                None
            },
            error_message: if status.error_message.is_empty() {
                None
            } else {
                Some(status.error_message)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_status_round_trips_through_the_wire_type() {
        let original = CoreCompletionStatus {
            state: CoreSweepState::Completed,
            target_sequence: "seq-5".to_string(),
            total_targets: 6,
            completed_targets: 6,
            completion_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0),
            error_message: None,
        };

        let wire: SweepCompletionStatus = original.clone().into();
        let back: CoreCompletionStatus = wire.into();
        assert_eq!(back.state, original.state);
        assert_eq!(back.completed_targets, original.completed_targets);
        assert_eq!(back.completion_time, original.completion_time);
    }

    #[test]
    fn unset_completion_time_maps_to_zero_on_the_wire() {
        let status = CoreCompletionStatus {
            state: CoreSweepState::Failed,
            target_sequence: "seq-4".to_string(),
            total_targets: 6,
            completed_targets: 2,
            completion_time: None,
            error_message: Some("cycle cancelled before completion".to_string()),
        };

        let wire: SweepCompletionStatus = status.into();
        assert_eq!(wire.completion_time, 0);
        assert_eq!(wire.error_message, "cycle cancelled before completion");
    }
}
