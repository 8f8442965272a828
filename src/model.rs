//! Officer and incident records referenced by the assignment engine.
//!
//! These are owned by the persistence collaborator; the engine only reads
//! them and patches an officer's status and incident reference.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an officer record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfficerId(String);

impl OfficerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfficerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfficerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of an incident record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Duty status of an officer.
///
/// Serialized in camelCase (`"offDuty"`) to match the officer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OfficerStatus {
    #[default]
    Available,
    Busy,
    Responding,
    OffDuty,
}

impl fmt::Display for OfficerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Responding => "responding",
            Self::OffDuty => "offDuty",
        };
        f.write_str(s)
    }
}

/// An officer record as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Officer {
    pub id: OfficerId,
    pub display_name: String,
    #[serde(default)]
    pub status: OfficerStatus,
    #[serde(default)]
    pub current_incident: Option<IncidentId>,
}

impl Officer {
    /// An available officer with no incident reference.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: OfficerId::new(id),
            display_name: display_name.into(),
            status: OfficerStatus::Available,
            current_incident: None,
        }
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &OfficerPatch) {
        self.status = patch.status;
        match &patch.incident {
            IncidentChange::Keep => {}
            IncidentChange::Clear => self.current_incident = None,
            IncidentChange::Set(id) => self.current_incident = Some(id.clone()),
        }
    }
}

/// An active incident. Only the address matters to the engine: it is the
/// string searched for slot names when an officer is dropped on the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub address: String,
}

impl Incident {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: IncidentId::new(id),
            address: address.into(),
        }
    }
}

/// What to do with an officer's incident reference during an update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "op", content = "incident_id", rename_all = "snake_case")]
pub enum IncidentChange {
    #[default]
    Keep,
    Clear,
    Set(IncidentId),
}

/// Status update applied to one officer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficerPatch {
    pub status: OfficerStatus,
    pub incident: IncidentChange,
}

impl OfficerPatch {
    /// Officer is responding; the incident reference is left alone.
    pub fn responding() -> Self {
        Self {
            status: OfficerStatus::Responding,
            incident: IncidentChange::Keep,
        }
    }

    /// Officer is responding to `incident`.
    pub fn responding_to(incident: IncidentId) -> Self {
        Self {
            status: OfficerStatus::Responding,
            incident: IncidentChange::Set(incident),
        }
    }

    /// Officer is back in the pool: available with no incident.
    pub fn available() -> Self {
        Self {
            status: OfficerStatus::Available,
            incident: IncidentChange::Clear,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_string(&OfficerStatus::OffDuty).unwrap();
        assert_eq!(json, "\"offDuty\"");
        let back: OfficerStatus = serde_json::from_str("\"responding\"").unwrap();
        assert_eq!(back, OfficerStatus::Responding);
    }

    #[test]
    fn available_patch_clears_incident() {
        let mut officer = Officer::new("o-1", "Reyes");
        officer.apply(&OfficerPatch::responding_to(IncidentId::new("inc-9")));
        assert_eq!(officer.status, OfficerStatus::Responding);
        assert_eq!(officer.current_incident, Some(IncidentId::new("inc-9")));

        officer.apply(&OfficerPatch::available());
        assert_eq!(officer.status, OfficerStatus::Available);
        assert_eq!(officer.current_incident, None);
    }

    #[test]
    fn responding_patch_keeps_incident() {
        let mut officer = Officer::new("o-1", "Reyes");
        officer.current_incident = Some(IncidentId::new("inc-1"));
        officer.apply(&OfficerPatch::responding());
        assert_eq!(officer.current_incident, Some(IncidentId::new("inc-1")));
    }

    #[test]
    fn officer_defaults_missing_fields() {
        let officer: Officer =
            serde_json::from_str(r#"{"id":"o-2","display_name":"Chen"}"#).unwrap();
        assert_eq!(officer.status, OfficerStatus::Available);
        assert!(officer.current_incident.is_none());
    }
}
