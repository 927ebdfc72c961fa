//! Three-strike confirmation counting.
//!
//! Counters are an immutable value type: every update returns a new
//! value, which keeps the monotonicity property checkable without
//! running the whole engine. Exhaustion is a fresh comparison against
//! the tenant threshold on every call; nothing is memoized.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use super::slots::SlotName;

/// What a confirmation attempt counts against: a real slot, or the
/// virtual "final" slot that bounds the final-confirmation re-asks.
///
/// Serialized as its stable name so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfirmTarget {
    Slot(SlotName),
    Final,
}

impl ConfirmTarget {
    /// Name used in escalation reasons and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmTarget::Slot(slot) => slot.as_str(),
            ConfirmTarget::Final => "final_confirmation",
        }
    }

    /// Parses the stable name back into a target.
    pub fn parse(s: &str) -> Option<ConfirmTarget> {
        if s == "final_confirmation" {
            return Some(ConfirmTarget::Final);
        }
        SlotName::parse(s).map(ConfirmTarget::Slot)
    }
}

impl Serialize for ConfirmTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConfirmTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        ConfirmTarget::parse(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown confirm target '{}'", name)))
    }
}

impl fmt::Display for ConfirmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// The count after this attempt.
    pub count: u32,
    /// True exactly when the count has reached the threshold.
    pub exhausted: bool,
}

/// Per-target attempt counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationCounters {
    counts: BTreeMap<ConfirmTarget, u32>,
}

impl ConfirmationCounters {
    /// Creates counters with everything at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for a target.
    pub fn count(&self, target: ConfirmTarget) -> u32 {
        self.counts.get(&target).copied().unwrap_or(0)
    }

    /// Records one failed attempt against a target.
    ///
    /// Exhaustion fires exactly when the new count reaches the
    /// threshold, never before and never silently after.
    pub fn record(&self, target: ConfirmTarget, threshold: u32) -> (Self, AttemptRecord) {
        let mut next = self.clone();
        let count = next.counts.entry(target).or_insert(0);
        *count += 1;
        let record = AttemptRecord {
            count: *count,
            exhausted: *count >= threshold,
        };
        (next, record)
    }

    /// Resets a target back to zero (successful confirmation or a
    /// changed value).
    pub fn reset(&self, target: ConfirmTarget) -> Self {
        let mut next = self.clone();
        next.counts.remove(&target);
        next
    }

    /// The first target at or past its threshold, if any.
    pub fn first_exhausted(&self, threshold_for: impl Fn(ConfirmTarget) -> u32) -> Option<ConfirmTarget> {
        self.counts
            .iter()
            .find(|(target, count)| **count >= threshold_for(**target))
            .map(|(target, _)| *target)
    }
}
