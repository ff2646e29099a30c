//! Time types for weft.
//!
//! Scheduling decisions never depend on wall-clock time; timestamps are
//! metadata stamped on events and context entries, and the clock behind
//! context TTLs.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Wall clock timestamp in UTC, serialized as RFC 3339
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create from milliseconds since the Unix epoch
    ///
    /// # Errors
    ///
    /// Returns error if the value is outside chrono's representable range
    pub fn from_millis(millis: i64) -> CoreResult<Self> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimestamp {
                reason: format!("{} ms is out of range", millis),
            })
    }

    /// Milliseconds since the Unix epoch
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Timestamp shifted forward by `millis`, saturating at the far future
    #[must_use]
    pub fn add_millis(&self, millis: u64) -> Self {
        let delta = chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX));
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is in the future
    #[must_use]
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        let delta = self.0.signed_duration_since(earlier.0).num_milliseconds();
        u64::try_from(delta).unwrap_or(0)
    }

    /// Get the underlying chrono value
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}
