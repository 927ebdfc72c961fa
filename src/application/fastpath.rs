//! Local fast-path classifier.
//!
//! Trivial turns (bare yes/no, a phone number or email, an obvious
//! time phrase) are classified deterministically here, skipping the
//! network round-trip to the classification collaborator entirely.
//! Deliberately conservative: anything with hedging or extra content
//! falls through to the real classifier.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::dialogue::{ClassifiedTurn, IntentCategory};

static YES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(yes|yeah|yep|yup|correct|right|exactly|sure|sounds good|that's right|that works)[.!]?$")
        .expect("yes pattern is valid")
});

static NO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(no|nope|nah|wrong|that's wrong|not right|incorrect)[.!]?$")
        .expect("no pattern is valid")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?[\d\s().-]{7,20}$").expect("phone pattern is valid")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:next|this)\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|today|tomorrow)(?:\s+(?:morning|afternoon|evening))?(?:\s+at\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?)?$|^\d{1,2}(?::\d{2})?\s*(?:am|pm)$",
    )
    .expect("time pattern is valid")
});

/// Tries to classify a transcript without the external collaborator.
///
/// Returns `None` for anything not trivially recognizable.
pub fn classify_fast(transcript: &str) -> Option<ClassifiedTurn> {
    let trimmed = transcript.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }

    if YES_RE.is_match(trimmed) {
        return Some(ClassifiedTurn::new(
            IntentCategory::Affirmative,
            1.0,
            trimmed,
        ));
    }
    if NO_RE.is_match(trimmed) {
        return Some(ClassifiedTurn::new(IntentCategory::Negative, 1.0, trimmed));
    }
    if PHONE_RE.is_match(trimmed) {
        let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
        if (7..=15).contains(&digits) {
            return Some(
                ClassifiedTurn::new(IntentCategory::ContactProvided, 1.0, trimmed)
                    .with_entity("contact", trimmed),
            );
        }
        return None;
    }
    if EMAIL_RE.is_match(trimmed) {
        return Some(
            ClassifiedTurn::new(IntentCategory::ContactProvided, 1.0, trimmed)
                .with_entity("contact", trimmed),
        );
    }
    if TIME_RE.is_match(trimmed) {
        return Some(
            ClassifiedTurn::new(IntentCategory::TimeProvided, 1.0, trimmed)
                .with_entity("time_window", trimmed),
        );
    }

    None
}
