use serde::{Deserialize, Serialize};

use crate::registry::ContractRecord;

/// Time-derived lifecycle state. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Active,
    Resolved,
    Exercised,
    NeedsResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub is_expired: bool,
    pub resolution_status: ResolutionStatus,
}

/// `expiry` is strict: a contract is expired only once `now` is past it
pub fn is_expired(expiry_timestamp: Option<u64>, now: u64) -> bool {
    matches!(expiry_timestamp, Some(expiry) if expiry > 0 && now > expiry)
}

/// Classify a record at unix time `now`.
///
/// Order matters: an unexpired contract is `active` even if flagged resolved,
/// and resolution wins over exercise once expired.
pub fn classify(record: &ContractRecord, now: u64) -> Classification {
    let expired = is_expired(record.expiry_timestamp, now);

    let resolution_status = if !expired {
        ResolutionStatus::Active
    } else if record.is_resolved {
        ResolutionStatus::Resolved
    } else if record.is_exercised {
        ResolutionStatus::Exercised
    } else {
        ResolutionStatus::NeedsResolution
    };

    Classification {
        is_expired: expired,
        resolution_status,
    }
}
