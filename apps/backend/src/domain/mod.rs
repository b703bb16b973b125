//! Pure experiment domain: shared types, payoff resolution, order draws.
//!
//! Nothing in this module performs I/O or touches session state; the
//! orchestration layers build on these primitives.

pub mod order;
pub mod payoff;
pub mod types;

pub use order::draw_decision_order;
pub use payoff::{is_bank_run, resolve_sequential, resolve_simultaneous, RoundOutcome};
pub use types::{
    BySlot, ChatFrequency, ChatMessage, ConfigOverrides, Decision, GameConfig, GameMode,
    GameStatus, PaidWhen, Payoffs, PlayerProfile, RoundResult, SlotId, TimerPhase,
};
