//! Frame timestamps and time-cursor deltas
//!
//! Peers stamp frames either with an ISO-8601 string or with epoch seconds.
//! Both are normalized to `FrameTimestamp` (seconds since the Unix epoch).
//! The session converts the gap between two processed frames into an
//! integer number of time-cursor ticks.

use chrono::{DateTime, NaiveDateTime};

use crate::{DeltaPolicy, RigError, RigResult};

/// Absolute frame timestamp, seconds since the Unix epoch
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default)]
pub struct FrameTimestamp(pub f64);

impl FrameTimestamp {
    #[inline]
    pub fn from_epoch_secs(secs: f64) -> RigResult<Self> {
        if !secs.is_finite() {
            return Err(RigError::InvalidTimestamp(format!("{secs}")));
        }
        Ok(FrameTimestamp(secs))
    }

    /// Parse an ISO-8601 timestamp.
    ///
    /// Strings with an explicit offset are honoured; naive strings are UTC.
    pub fn parse_iso8601(s: &str) -> RigResult<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_micros(dt.timestamp_micros()));
        }

        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M",
        ];
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::from_micros(naive.and_utc().timestamp_micros()));
            }
        }

        Err(RigError::InvalidTimestamp(s.to_string()))
    }

    #[inline]
    fn from_micros(micros: i64) -> Self {
        FrameTimestamp(micros as f64 / 1_000_000.0)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }
}

/// Tracks the previously processed timestamp and converts gaps to ticks
#[derive(Clone, Debug)]
pub struct TimestampTracker {
    previous: Option<FrameTimestamp>,
    scale: f64,
    policy: DeltaPolicy,
}

impl TimestampTracker {
    pub fn new(scale: f64, policy: DeltaPolicy) -> Self {
        TimestampTracker {
            previous: None,
            scale,
            policy,
        }
    }

    /// Forget the previous timestamp (session start)
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<FrameTimestamp> {
        self.previous
    }

    /// Cursor delta for `ts`, without committing it.
    ///
    /// The first frame after a reset has delta zero.
    pub fn delta_for(&self, ts: FrameTimestamp) -> RigResult<i64> {
        let Some(previous) = self.previous else {
            return Ok(0);
        };
        let raw = ((ts.0 - previous.0) * self.scale).round();
        let raw = raw.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        self.policy.apply(raw).ok_or(RigError::RejectedDelta(raw))
    }

    /// Record `ts` as the last successfully processed timestamp
    pub fn commit(&mut self, ts: FrameTimestamp) {
        self.previous = Some(ts);
    }
}
