//! Booking slots: the fixed set of facts a conversation must collect.
//!
//! A slot value is *collected* once it passes format validation
//! (`validated = true`) and *locked in* once the caller has explicitly
//! agreed to it (`confirmed = true`). Validation here is format-level
//! only; linguistic interpretation belongs to the classification
//! collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::foundation::ValidationError;

/// The fixed set of slot names a booking conversation collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Service,
    TimeWindow,
    Contact,
    Location,
}

impl SlotName {
    /// All slot names, in collection priority order.
    pub const ALL: [SlotName; 4] = [
        SlotName::Service,
        SlotName::Location,
        SlotName::TimeWindow,
        SlotName::Contact,
    ];

    /// Slots this tenant requires, in collection priority order:
    /// service, then location when the tenant needs one, then time,
    /// then contact.
    pub fn required(location_required: bool) -> Vec<SlotName> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| *s != SlotName::Location || location_required)
            .collect()
    }

    /// Stable snake_case name, matching entity keys and serde output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::Service => "service",
            SlotName::TimeWindow => "time_window",
            SlotName::Contact => "contact",
            SlotName::Location => "location",
        }
    }

    /// Parses an entity key or correction target into a slot name.
    pub fn parse(s: &str) -> Option<SlotName> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" => Some(SlotName::Service),
            "time_window" | "time" | "timewindow" => Some(SlotName::TimeWindow),
            "contact" | "phone" | "email" => Some(SlotName::Contact),
            "location" | "address" => Some(SlotName::Location),
            _ => None,
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the service takes place. Each kind has its own required detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// At the caller's address; requires a street address.
    OnSite,
    /// At the business premises; no extra detail required.
    AtBusiness,
    /// Remote session; requires a link or dial-in number.
    Remote,
}

impl LocationKind {
    /// Parses a classifier-provided kind token, with common synonyms.
    pub fn parse(s: &str) -> Option<LocationKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_site" | "onsite" | "on-site" | "home" | "customer" => Some(LocationKind::OnSite),
            "at_business" | "in_store" | "shop" | "salon" | "office" => {
                Some(LocationKind::AtBusiness)
            }
            "remote" | "virtual" | "video" | "phone_call" => Some(LocationKind::Remote),
            _ => None,
        }
    }
}

/// A contact the booking can be confirmed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactInfo {
    Phone(String),
    Email(String),
}

impl ContactInfo {
    /// Parses a raw utterance fragment into a phone or email contact.
    ///
    /// Phone: at least seven digits once separators are stripped.
    /// Email: a single `@` with a dotted domain.
    pub fn parse(raw: &str) -> Result<ContactInfo, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::empty_field("contact"));
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 7 && digits.len() <= 15 {
            return Ok(ContactInfo::Phone(normalize_phone(trimmed)));
        }

        if looks_like_email(trimmed) {
            return Ok(ContactInfo::Email(trimmed.to_ascii_lowercase()));
        }

        Err(ValidationError::invalid_format(
            "contact",
            "expected a phone number or an email address",
        ))
    }
}

fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

fn looks_like_email(s: &str) -> bool {
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}

/// A validated location value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationValue {
    pub kind: LocationKind,
    /// Street address for on-site, link/number for remote.
    pub detail: Option<String>,
}

impl LocationValue {
    /// Validates the kind-specific required detail.
    pub fn parse(kind: LocationKind, detail: Option<&str>) -> Result<LocationValue, ValidationError> {
        let detail = detail.map(str::trim).filter(|d| !d.is_empty());
        match kind {
            LocationKind::OnSite if detail.is_none() => Err(ValidationError::invalid_format(
                "location",
                "on-site service requires a street address",
            )),
            LocationKind::Remote if detail.is_none() => Err(ValidationError::invalid_format(
                "location",
                "remote service requires a link or dial-in number",
            )),
            _ => Ok(LocationValue {
                kind,
                detail: detail.map(str::to_string),
            }),
        }
    }
}

/// A validated slot value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotValue {
    Service(String),
    TimeWindow(String),
    Contact(ContactInfo),
    Location(LocationValue),
}

/// Day words accepted as evidence that a phrase describes a time window.
const TIME_WORDS: [&str; 16] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "today",
    "tomorrow",
    "tonight",
    "morning",
    "afternoon",
    "evening",
    "noon",
    "midday",
    "weekend",
];

impl SlotValue {
    /// Validates a raw value against the format rules for the given slot.
    ///
    /// Location values carry a kind token alongside the detail; use
    /// [`SlotValue::parse_location`] for those.
    pub fn parse(slot: SlotName, raw: &str) -> Result<SlotValue, ValidationError> {
        let trimmed = raw.trim();
        match slot {
            SlotName::Service => {
                if trimmed.is_empty() {
                    Err(ValidationError::empty_field("service"))
                } else if trimmed.len() > 120 {
                    Err(ValidationError::invalid_format(
                        "service",
                        "service name too long",
                    ))
                } else {
                    Ok(SlotValue::Service(trimmed.to_string()))
                }
            }
            SlotName::TimeWindow => {
                if trimmed.is_empty() {
                    return Err(ValidationError::empty_field("time_window"));
                }
                let lowered = trimmed.to_ascii_lowercase();
                let has_digit = lowered.chars().any(|c| c.is_ascii_digit());
                let has_day_word = TIME_WORDS.iter().any(|w| lowered.contains(w));
                if has_digit || has_day_word {
                    Ok(SlotValue::TimeWindow(trimmed.to_string()))
                } else {
                    Err(ValidationError::invalid_format(
                        "time_window",
                        "no recognizable day or time in phrase",
                    ))
                }
            }
            SlotName::Contact => ContactInfo::parse(trimmed).map(SlotValue::Contact),
            SlotName::Location => {
                // No kind token: treat a bare value as the business default.
                LocationValue::parse(LocationKind::AtBusiness, Some(trimmed))
                    .map(SlotValue::Location)
            }
        }
    }

    /// Validates a location value with an explicit kind token.
    pub fn parse_location(kind: LocationKind, detail: Option<&str>) -> Result<SlotValue, ValidationError> {
        LocationValue::parse(kind, detail).map(SlotValue::Location)
    }

    /// Renders the value the way it should be spoken back to the caller.
    pub fn spoken(&self) -> String {
        match self {
            SlotValue::Service(s) => s.clone(),
            SlotValue::TimeWindow(t) => t.clone(),
            SlotValue::Contact(ContactInfo::Phone(p)) => p.clone(),
            SlotValue::Contact(ContactInfo::Email(e)) => e.clone(),
            SlotValue::Location(l) => match (l.kind, l.detail.as_deref()) {
                (LocationKind::OnSite, Some(d)) => format!("on site at {}", d),
                (LocationKind::OnSite, None) => "on site".to_string(),
                (LocationKind::AtBusiness, Some(d)) => d.to_string(),
                (LocationKind::AtBusiness, None) => "at our location".to_string(),
                (LocationKind::Remote, Some(d)) => format!("remotely via {}", d),
                (LocationKind::Remote, None) => "remotely".to_string(),
            },
        }
    }
}

/// One collected slot with its validation/confirmation flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    pub value: SlotValue,
    pub confidence: f32,
    pub validated: bool,
    pub confirmed: bool,
    pub last_updated: DateTime<Utc>,
}

/// The per-session slot map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotBoard {
    slots: BTreeMap<SlotName, SlotState>,
}

impl SlotBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of a slot, if collected.
    pub fn get(&self, slot: SlotName) -> Option<&SlotState> {
        self.slots.get(&slot)
    }

    /// Records a freshly validated (but unconfirmed) value.
    pub fn fill(&mut self, slot: SlotName, value: SlotValue, confidence: f32, now: DateTime<Utc>) {
        self.slots.insert(
            slot,
            SlotState {
                value,
                confidence,
                validated: true,
                confirmed: false,
                last_updated: now,
            },
        );
    }

    /// Marks a slot as explicitly confirmed by the caller.
    ///
    /// Returns true if the flag actually flipped.
    pub fn confirm(&mut self, slot: SlotName, now: DateTime<Utc>) -> bool {
        match self.slots.get_mut(&slot) {
            Some(state) if !state.confirmed => {
                state.confirmed = true;
                state.last_updated = now;
                true
            }
            _ => false,
        }
    }

    /// Drops a slot entirely (negative confirmation or correction).
    ///
    /// Returns true if a confirmed value was removed.
    pub fn clear(&mut self, slot: SlotName) -> bool {
        self.slots
            .remove(&slot)
            .map(|s| s.confirmed)
            .unwrap_or(false)
    }

    /// True when the slot has a validated value.
    pub fn is_validated(&self, slot: SlotName) -> bool {
        self.get(slot).map(|s| s.validated).unwrap_or(false)
    }

    /// True when the slot is validated and explicitly confirmed.
    pub fn is_locked_in(&self, slot: SlotName) -> bool {
        self.get(slot)
            .map(|s| s.validated && s.confirmed)
            .unwrap_or(false)
    }

    /// The first required slot that is not yet validated and confirmed.
    pub fn next_unmet(&self, location_required: bool) -> Option<SlotName> {
        SlotName::required(location_required)
            .into_iter()
            .find(|s| !self.is_locked_in(*s))
    }

    /// True when every tenant-required slot is validated and confirmed.
    pub fn all_locked_in(&self, location_required: bool) -> bool {
        self.next_unmet(location_required).is_none()
    }

    /// Iterates collected slots in priority order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotName, &SlotState)> {
        SlotName::ALL
            .iter()
            .filter_map(move |s| self.slots.get(s).map(|state| (*s, state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    mod slot_name {
        use super::*;

        #[test]
        fn required_includes_location_only_when_needed() {
            let with = SlotName::required(true);
            let without = SlotName::required(false);

            assert!(with.contains(&SlotName::Location));
            assert!(!without.contains(&SlotName::Location));
            assert_eq!(without.len(), 3);
        }

        #[test]
        fn priority_order_is_service_location_time_contact() {
            assert_eq!(
                SlotName::required(true),
                vec![
                    SlotName::Service,
                    SlotName::Location,
                    SlotName::TimeWindow,
                    SlotName::Contact
                ]
            );
        }

        #[test]
        fn parse_accepts_synonyms() {
            assert_eq!(SlotName::parse("time"), Some(SlotName::TimeWindow));
            assert_eq!(SlotName::parse("phone"), Some(SlotName::Contact));
            assert_eq!(SlotName::parse("Service"), Some(SlotName::Service));
            assert_eq!(SlotName::parse("budget"), None);
        }

        #[test]
        fn serializes_to_snake_case() {
            let json = serde_json::to_string(&SlotName::TimeWindow).unwrap();
            assert_eq!(json, "\"time_window\"");
        }
    }

    mod contact_validation {
        use super::*;

        #[test]
        fn accepts_phone_with_separators() {
            let contact = ContactInfo::parse("(555) 123-4567").unwrap();
            assert_eq!(contact, ContactInfo::Phone("5551234567".to_string()));
        }

        #[test]
        fn accepts_email() {
            let contact = ContactInfo::parse("Sam@Example.com").unwrap();
            assert_eq!(contact, ContactInfo::Email("sam@example.com".to_string()));
        }

        #[test]
        fn rejects_short_digit_runs() {
            assert!(ContactInfo::parse("12345").is_err());
        }

        #[test]
        fn rejects_plain_words() {
            assert!(ContactInfo::parse("call me whenever").is_err());
        }

        #[test]
        fn rejects_empty() {
            assert!(ContactInfo::parse("   ").is_err());
        }
    }

    mod time_validation {
        use super::*;

        #[test]
        fn accepts_day_word_phrases() {
            assert!(SlotValue::parse(SlotName::TimeWindow, "Friday afternoon").is_ok());
            assert!(SlotValue::parse(SlotName::TimeWindow, "tomorrow").is_ok());
        }

        #[test]
        fn accepts_clock_times() {
            assert!(SlotValue::parse(SlotName::TimeWindow, "at 3pm").is_ok());
        }

        #[test]
        fn rejects_phrases_without_time_evidence() {
            assert!(SlotValue::parse(SlotName::TimeWindow, "whenever works").is_err());
        }
    }

    mod location_validation {
        use super::*;

        #[test]
        fn on_site_requires_address() {
            assert!(LocationValue::parse(LocationKind::OnSite, None).is_err());
            assert!(LocationValue::parse(LocationKind::OnSite, Some("12 Main St")).is_ok());
        }

        #[test]
        fn remote_requires_link_or_number() {
            assert!(LocationValue::parse(LocationKind::Remote, None).is_err());
            assert!(LocationValue::parse(LocationKind::Remote, Some("meet.example/abc")).is_ok());
        }

        #[test]
        fn at_business_needs_no_detail() {
            assert!(LocationValue::parse(LocationKind::AtBusiness, None).is_ok());
        }

        #[test]
        fn kind_parses_synonyms() {
            assert_eq!(LocationKind::parse("onsite"), Some(LocationKind::OnSite));
            assert_eq!(LocationKind::parse("virtual"), Some(LocationKind::Remote));
            assert_eq!(
                LocationKind::parse("in_store"),
                Some(LocationKind::AtBusiness)
            );
        }
    }

    mod slot_board {
        use super::*;

        fn service_value() -> SlotValue {
            SlotValue::Service("haircut".to_string())
        }

        #[test]
        fn fill_marks_validated_not_confirmed() {
            let mut board = SlotBoard::new();
            board.fill(SlotName::Service, service_value(), 0.9, now());

            assert!(board.is_validated(SlotName::Service));
            assert!(!board.is_locked_in(SlotName::Service));
        }

        #[test]
        fn confirm_locks_in() {
            let mut board = SlotBoard::new();
            board.fill(SlotName::Service, service_value(), 0.9, now());

            assert!(board.confirm(SlotName::Service, now()));
            assert!(board.is_locked_in(SlotName::Service));
        }

        #[test]
        fn confirm_reports_no_flip_when_already_confirmed() {
            let mut board = SlotBoard::new();
            board.fill(SlotName::Service, service_value(), 0.9, now());
            board.confirm(SlotName::Service, now());

            assert!(!board.confirm(SlotName::Service, now()));
        }

        #[test]
        fn clear_removes_slot() {
            let mut board = SlotBoard::new();
            board.fill(SlotName::Service, service_value(), 0.9, now());
            board.confirm(SlotName::Service, now());

            assert!(board.clear(SlotName::Service));
            assert!(!board.is_validated(SlotName::Service));
        }

        #[test]
        fn next_unmet_follows_priority_order() {
            let mut board = SlotBoard::new();
            assert_eq!(board.next_unmet(true), Some(SlotName::Service));

            board.fill(SlotName::Service, service_value(), 0.9, now());
            board.confirm(SlotName::Service, now());
            assert_eq!(board.next_unmet(true), Some(SlotName::Location));
            assert_eq!(board.next_unmet(false), Some(SlotName::TimeWindow));
        }

        #[test]
        fn all_locked_in_ignores_location_when_not_required() {
            let mut board = SlotBoard::new();
            for slot in [SlotName::Service, SlotName::TimeWindow] {
                let value = match slot {
                    SlotName::Service => service_value(),
                    _ => SlotValue::TimeWindow("Friday 3pm".to_string()),
                };
                board.fill(slot, value, 0.9, now());
                board.confirm(slot, now());
            }
            board.fill(
                SlotName::Contact,
                SlotValue::Contact(ContactInfo::Phone("5551234".to_string())),
                0.9,
                now(),
            );
            board.confirm(SlotName::Contact, now());

            assert!(board.all_locked_in(false));
            assert!(!board.all_locked_in(true));
        }

        #[test]
        fn validated_but_unconfirmed_is_still_unmet() {
            let mut board = SlotBoard::new();
            board.fill(SlotName::Service, service_value(), 0.9, now());

            assert_eq!(board.next_unmet(false), Some(SlotName::Service));
        }
    }
}
