//! Decision-order draws.

use rand::seq::SliceRandom;

use crate::domain::types::SlotId;

/// Draw a fresh uniformly random permutation of the three slots.
///
/// Used as the turn order in sequential mode and as the withdrawal
/// priority tie-break in simultaneous mode; no slot is privileged.
pub fn draw_decision_order() -> [SlotId; 3] {
    let mut order = SlotId::ALL;
    order.shuffle(&mut rand::thread_rng());
    order
}
