use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ServiceSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Menu,
    ChooseService,
    ChooseDate,
    ChooseTime,
    Confirm,
    CancelWait,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Menu => "MENU",
            SessionState::ChooseService => "CHOOSE_SERVICE",
            SessionState::ChooseDate => "CHOOSE_DATE",
            SessionState::ChooseTime => "CHOOSE_TIME",
            SessionState::Confirm => "CONFIRM",
            SessionState::CancelWait => "CANCEL_WAIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MENU" => Some(SessionState::Menu),
            "CHOOSE_SERVICE" => Some(SessionState::ChooseService),
            "CHOOSE_DATE" => Some(SessionState::ChooseDate),
            "CHOOSE_TIME" => Some(SessionState::ChooseTime),
            "CONFIRM" => Some(SessionState::Confirm),
            "CANCEL_WAIT" => Some(SessionState::CancelWait),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSelection {
    pub service: ServiceSnapshot,
    pub date: NaiveDate,
    /// `None` after a conflict or when the cached list was lost; recomputed on use.
    #[serde(default)]
    pub slots: Option<Vec<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub service: ServiceSnapshot,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCandidate {
    pub appointment_id: String,
    pub cancel_code: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCandidates {
    pub candidates: Vec<CancelCandidate>,
}

/// State plus the scratch data that state carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    Menu,
    ChooseService,
    ChooseDate(ServiceSnapshot),
    ChooseTime(TimeSelection),
    Confirm(PendingConfirmation),
    CancelWait(CancelCandidates),
}

impl SessionStep {
    pub fn state(&self) -> SessionState {
        match self {
            SessionStep::Menu => SessionState::Menu,
            SessionStep::ChooseService => SessionState::ChooseService,
            SessionStep::ChooseDate(_) => SessionState::ChooseDate,
            SessionStep::ChooseTime(_) => SessionState::ChooseTime,
            SessionStep::Confirm(_) => SessionState::Confirm,
            SessionStep::CancelWait(_) => SessionState::CancelWait,
        }
    }

    /// The `temp` column payload. Stateless steps store an empty object.
    pub fn temp(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SessionStep::Menu | SessionStep::ChooseService => Ok(serde_json::json!({})),
            SessionStep::ChooseDate(service) => serde_json::to_value(service),
            SessionStep::ChooseTime(selection) => serde_json::to_value(selection),
            SessionStep::Confirm(pending) => serde_json::to_value(pending),
            SessionStep::CancelWait(candidates) => serde_json::to_value(candidates),
        }
    }

    /// Rebuilds a step from its persisted parts. `None` when the temp payload
    /// does not match what the state requires.
    pub fn from_parts(state: SessionState, temp: serde_json::Value) -> Option<Self> {
        fn decode<T: DeserializeOwned>(temp: serde_json::Value) -> Option<T> {
            serde_json::from_value(temp).ok()
        }

        match state {
            SessionState::Menu => Some(SessionStep::Menu),
            SessionState::ChooseService => Some(SessionStep::ChooseService),
            SessionState::ChooseDate => decode(temp).map(SessionStep::ChooseDate),
            SessionState::ChooseTime => decode(temp).map(SessionStep::ChooseTime),
            SessionState::Confirm => decode(temp).map(SessionStep::Confirm),
            SessionState::CancelWait => decode(temp).map(SessionStep::CancelWait),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub provider_id: String,
    pub customer_id: String,
    pub step: SessionStep,
    pub last_interaction_at: DateTime<Utc>,
}

impl Session {
    pub fn new(provider_id: &str, customer_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            customer_id: customer_id.to_string(),
            step: SessionStep::Menu,
            last_interaction_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.step.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ServiceSnapshot {
        ServiceSnapshot {
            service_id: 7,
            service_name: "Haircut".to_string(),
            duration_minutes: 30,
            price: 2000,
        }
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            SessionState::Menu,
            SessionState::ChooseService,
            SessionState::ChooseDate,
            SessionState::ChooseTime,
            SessionState::Confirm,
            SessionState::CancelWait,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("CANCEL"), None);
    }

    #[test]
    fn test_menu_temp_is_empty_object() {
        assert_eq!(SessionStep::Menu.temp().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_choose_time_without_slots_decodes() {
        let temp = serde_json::json!({
            "service": snapshot(),
            "date": "2026-03-02",
        });
        let step = SessionStep::from_parts(SessionState::ChooseTime, temp).unwrap();
        match step {
            SessionStep::ChooseTime(selection) => {
                assert_eq!(selection.service, snapshot());
                assert!(selection.slots.is_none());
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_temp_is_rejected() {
        assert!(SessionStep::from_parts(SessionState::Confirm, serde_json::json!({})).is_none());
        assert!(
            SessionStep::from_parts(SessionState::ChooseDate, serde_json::json!({"x": 1}))
                .is_none()
        );
    }

    #[test]
    fn test_choose_date_temp_carries_snapshot() {
        let step = SessionStep::ChooseDate(snapshot());
        let temp = step.temp().unwrap();
        assert_eq!(temp["service_name"], "Haircut");
        assert_eq!(
            SessionStep::from_parts(SessionState::ChooseDate, temp),
            Some(step)
        );
    }
}
