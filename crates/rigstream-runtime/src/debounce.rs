//! Error debouncer
//!
//! Turns raw per-tick outcomes into a stable fault signal. A non-fatal
//! error becomes visible only after it recurs with the same signature for
//! `threshold` consecutive ticks; a fatal error is visible at once; a tick
//! without any error clears the fault.

use rigstream_core::RigError;

/// Change of the visible fault after observing a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultChange {
    Unchanged,
    Raised,
    Cleared,
}

/// Errors collected during one tick
#[derive(Debug, Default)]
pub struct TickErrors {
    fatal: Option<RigError>,
    last: Option<RigError>,
    count: usize,
}

impl TickErrors {
    pub fn record(&mut self, error: RigError) {
        self.count += 1;
        if error.is_fatal() {
            if self.fatal.is_none() {
                self.fatal = Some(error);
            }
        } else {
            self.last = Some(error);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The error that represents the tick: the first fatal one, otherwise
    /// the most recent
    pub fn into_outcome(self) -> Option<RigError> {
        self.fatal.or(self.last)
    }
}

/// Debounced fault state
#[derive(Debug, Clone)]
pub struct ErrorDebouncer {
    threshold: u32,
    signature: Option<&'static str>,
    streak: u32,
    visible: Option<RigError>,
}

impl ErrorDebouncer {
    pub fn new(threshold: u32) -> Self {
        ErrorDebouncer {
            threshold: threshold.max(1),
            signature: None,
            streak: 0,
            visible: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Consecutive ticks the current signature has been seen
    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn visible(&self) -> Option<&RigError> {
        self.visible.as_ref()
    }

    /// Observe the outcome of one tick
    pub fn observe(&mut self, outcome: Option<&RigError>) -> FaultChange {
        let Some(error) = outcome else {
            self.signature = None;
            self.streak = 0;
            return match self.visible.take() {
                Some(_) => FaultChange::Cleared,
                None => FaultChange::Unchanged,
            };
        };

        if error.is_fatal() {
            self.signature = None;
            self.streak = 0;
            self.visible = Some(error.clone());
            return FaultChange::Raised;
        }

        let signature = error.signature();
        if self.signature == Some(signature) {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.signature = Some(signature);
            self.streak = 1;
        }

        if self.streak == self.threshold {
            self.visible = Some(error.clone());
            FaultChange::Raised
        } else {
            FaultChange::Unchanged
        }
    }

    /// Make an error visible immediately, regardless of class
    pub fn force(&mut self, error: RigError) {
        self.signature = None;
        self.streak = 0;
        self.visible = Some(error);
    }

    pub fn clear(&mut self) {
        self.signature = None;
        self.streak = 0;
        self.visible = None;
    }
}
