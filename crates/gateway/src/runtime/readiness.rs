//! Readiness tracker.
//!
//! Maps `anchors_found / target_cards` to one of six qualitative phrases
//! and a separate `is_ready` flag. Pure, so the web client can compute
//! the same answer from the same two numbers. Integer arithmetic keeps the
//! tier boundaries exact (no float rounding at 0.3/0.5/0.7/0.9).

use serde::Serialize;

const PHRASES: [&str; 6] = [
    "Let's begin exploring your theme...",
    "We're uncovering the first threads of your story...",
    "Your deck's themes are starting to take shape...",
    "Rich patterns are emerging in your story...",
    "Your deck is nearly ready to be drawn...",
    "Your deck is ready to come to life!",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub anchors_found: usize,
    pub target_cards: u32,
    pub is_ready: bool,
    pub readiness_text: String,
}

/// Tier index 0..=5. A zero target has nothing to measure against and
/// stays at the opening tier.
pub fn tier(anchors_found: usize, target_cards: u32) -> usize {
    let a = anchors_found as u64 * 10;
    let t = u64::from(target_cards);
    if anchors_found == 0 || t == 0 {
        0
    } else if a < 3 * t {
        1
    } else if a < 5 * t {
        2
    } else if a < 7 * t {
        3
    } else if a < 9 * t {
        4
    } else {
        5
    }
}

/// `anchors_found / target_cards >= 0.7`.
pub fn is_ready(anchors_found: usize, target_cards: u32) -> bool {
    target_cards > 0 && anchors_found as u64 * 10 >= 7 * u64::from(target_cards)
}

pub fn assess(anchors_found: usize, target_cards: u32) -> Readiness {
    Readiness {
        anchors_found,
        target_cards,
        is_ready: is_ready(anchors_found, target_cards),
        readiness_text: PHRASES[tier(anchors_found, target_cards)].to_string(),
    }
}
