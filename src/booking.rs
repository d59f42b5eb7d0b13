//! Booking interval overlap checks.
//!
//! Intervals are half-open: a booking ending at 09:30 does not clash with one starting
//! at 09:30.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Errors for a malformed candidate booking.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Invalid candidate interval")]
    InvalidInterval,
    #[error("Invalid duration: startsAt must be before endsAt")]
    InvalidDuration,
}

/// A booked (or requested) slot for a service, optionally pinned to a staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInterval {
    pub service_id: String,
    pub staff_id: Option<String>,
    /// RFC 3339 timestamp.
    pub starts_at: String,
    /// RFC 3339 timestamp.
    pub ends_at: String,
}

impl BookingInterval {
    pub fn new(
        service_id: impl Into<String>,
        staff_id: Option<&str>,
        starts_at: impl Into<String>,
        ends_at: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            staff_id: staff_id.map(str::to_string),
            starts_at: starts_at.into(),
            ends_at: ends_at.into(),
        }
    }

    fn bounds(&self) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        let start = DateTime::parse_from_rfc3339(&self.starts_at).ok()?;
        let end = DateTime::parse_from_rfc3339(&self.ends_at).ok()?;
        Some((start, end))
    }

    /// Staff only separates bookings when both sides name someone.
    fn shares_staff_with(&self, other: &BookingInterval) -> bool {
        match (self.staff_id.as_deref(), other.staff_id.as_deref()) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a == b,
            _ => true,
        }
    }
}

/// Whether `candidate` overlaps any of the `existing` bookings for the same service.
///
/// Existing bookings with unparseable timestamps are skipped.
pub fn has_conflict(
    existing: &[BookingInterval],
    candidate: &BookingInterval,
) -> Result<bool, ConflictError> {
    let (start, end) = candidate.bounds().ok_or(ConflictError::InvalidInterval)?;
    if start >= end {
        return Err(ConflictError::InvalidDuration);
    }

    Ok(existing.iter().any(|booking| {
        if booking.service_id != candidate.service_id || !booking.shares_staff_with(candidate) {
            return false;
        }
        match booking.bounds() {
            Some((existing_start, existing_end)) => start < existing_end && end > existing_start,
            None => false,
        }
    }))
}
