use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const REASON_READY: &str = "Ready";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_ORPHAN: &str = "Orphan";
pub const REASON_ERROR: &str = "Error";

/// Readiness of a reconciled resource, recomputed on every pass.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCondition {
    pub ready: bool,
    /// machine readable reason of the current state
    pub reason: String,
    /// human readable details
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl ReadinessCondition {
    /// Builds the next condition, keeping the previous transition time when
    /// neither readiness nor reason changed.
    pub fn next(
        previous: Option<&ReadinessCondition>,
        ready: bool,
        reason: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        let last_transition_time = match previous {
            Some(previous) if previous.ready == ready && previous.reason == reason => {
                previous.last_transition_time
            }
            _ => now,
        };

        Self {
            ready,
            reason: reason.to_owned(),
            message,
            last_transition_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn transition_time_only_moves_on_transitions() {
        let before = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let previous = ReadinessCondition::next(None, false, REASON_ORPHAN, "a".into(), before);

        let same =
            ReadinessCondition::next(Some(&previous), false, REASON_ORPHAN, "b".into(), now);
        let changed =
            ReadinessCondition::next(Some(&previous), true, REASON_READY, "".into(), now);

        assert_eq!(same.last_transition_time, before);
        assert_eq!(same.message, "b");
        assert_eq!(changed.last_transition_time, now);
    }
}
