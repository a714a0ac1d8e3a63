//! Providers, patients and state eligibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CareProvidingStateId, CareRole, PathwayId, PatientId, ProviderId};

/// Doctor or coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: ProviderId,
    pub role: CareRole,
    pub display_name: String,
    /// IANA timezone name; UTC when unset
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Patient, reduced to what routing needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: PatientId,
    /// Two-letter abbreviation of the state the patient is currently in
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// A (state, pathway) pair cases are routed within.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CareProvidingState {
    pub id: CareProvidingStateId,
    pub state: String,
    pub pathway_id: PathwayId,
}

/// Provider eligibility for one (state, pathway).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateEligibility {
    pub id: i64,
    pub care_providing_state_id: CareProvidingStateId,
    pub provider_id: ProviderId,
    /// Provider wants SMS/push about unclaimed work
    pub notify: bool,
    pub unavailable: bool,
}

/// Provider considered by the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyCandidate {
    pub provider_id: ProviderId,
    pub timezone: Option<String>,
    pub last_notified: Option<DateTime<Utc>>,
}

/// Daily quiet window `[start_hour, start_hour + num_hours)` in the
/// provider's local time. Wraps past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnoozeWindow {
    pub start_hour: u32,
    pub num_hours: u32,
}

impl SnoozeWindow {
    pub fn new(start_hour: u32, num_hours: u32) -> Self {
        Self {
            start_hour: start_hour % 24,
            num_hours: num_hours.min(24),
        }
    }

    /// Whether a local hour of day (0-23) falls inside the window.
    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.num_hours >= 24 {
            return true;
        }
        let offset = (hour % 24 + 24 - self.start_hour) % 24;
        offset < self.num_hours
    }
}
