use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content of the on-disk run lock marker.
///
/// Staleness is judged from `acquired_at`, never from the marker file's
/// modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub acquired_at: DateTime<Utc>,
    /// Process id of the owner.
    pub owner_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Observed state of the run lock, as reported by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Free,
    Held { marker: LockMarker },
    Stale { marker: LockMarker },
    Corrupt,
}
