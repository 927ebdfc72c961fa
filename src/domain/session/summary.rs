//! Progressive summary of confirmed booking facts.
//!
//! Recomputed only when a slot's confirmed flag flips, never on plain
//! context reads, so the cost stays O(slots) per confirmation rather
//! than per turn.

use super::slots::{SlotBoard, SlotName};

/// Fixed rendering order: service, location, time, contact.
const SUMMARY_ORDER: [SlotName; 4] = [
    SlotName::Service,
    SlotName::Location,
    SlotName::TimeWindow,
    SlotName::Contact,
];

/// Derives the human-readable progress string from confirmed slots.
pub struct ProgressSummarizer;

impl ProgressSummarizer {
    /// Renders confirmed slots in fixed order; empty when none are
    /// confirmed.
    pub fn recompute(slots: &SlotBoard) -> String {
        let parts: Vec<String> = SUMMARY_ORDER
            .iter()
            .filter_map(|slot| {
                slots
                    .get(*slot)
                    .filter(|s| s.confirmed)
                    .map(|s| format!("{}: {}", slot_label(*slot), s.value.spoken()))
            })
            .collect();
        parts.join(", ")
    }
}

fn slot_label(slot: SlotName) -> &'static str {
    match slot {
        SlotName::Service => "service",
        SlotName::Location => "location",
        SlotName::TimeWindow => "time",
        SlotName::Contact => "contact",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::slots::{ContactInfo, SlotValue};
    use chrono::Utc;

    #[test]
    fn empty_board_yields_empty_summary() {
        assert_eq!(ProgressSummarizer::recompute(&SlotBoard::new()), "");
    }

    #[test]
    fn unconfirmed_slots_are_excluded() {
        let mut board = SlotBoard::new();
        board.fill(
            SlotName::Service,
            SlotValue::Service("haircut".to_string()),
            0.9,
            Utc::now(),
        );

        assert_eq!(ProgressSummarizer::recompute(&board), "");
    }

    #[test]
    fn confirmed_slots_render_in_fixed_order() {
        let now = Utc::now();
        let mut board = SlotBoard::new();
        // Confirm contact first, then service; order must still be
        // service before contact.
        board.fill(
            SlotName::Contact,
            SlotValue::Contact(ContactInfo::Phone("5551234".to_string())),
            0.9,
            now,
        );
        board.confirm(SlotName::Contact, now);
        board.fill(
            SlotName::Service,
            SlotValue::Service("haircut".to_string()),
            0.9,
            now,
        );
        board.confirm(SlotName::Service, now);

        assert_eq!(
            ProgressSummarizer::recompute(&board),
            "service: haircut, contact: 5551234"
        );
    }

    #[test]
    fn time_renders_between_location_and_contact() {
        let now = Utc::now();
        let mut board = SlotBoard::new();
        board.fill(
            SlotName::TimeWindow,
            SlotValue::TimeWindow("Friday 3pm".to_string()),
            0.9,
            now,
        );
        board.confirm(SlotName::TimeWindow, now);

        assert_eq!(ProgressSummarizer::recompute(&board), "time: Friday 3pm");
    }
}
