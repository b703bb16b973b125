//! Pure payoff resolution for both game modes.
//!
//! Deterministic given its inputs: the simultaneous resolver takes the
//! withdrawal-priority permutation as a parameter instead of drawing it,
//! so the only randomness lives with the caller.

use crate::domain::types::{BySlot, Decision, PaidWhen, Payoffs, SlotId};

const TRACE_SEPARATOR: &str = " -> ";

/// Resolved payoffs for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub payoffs: BySlot<u32>,
    /// Sequential mode only.
    pub paid_when: Option<BySlot<PaidWhen>>,
    /// Sequential mode only.
    pub seq_trace: Option<String>,
}

/// True iff at least one patient depositor withdrew.
pub fn is_bank_run(decisions: &BySlot<Decision>) -> bool {
    SlotId::PATIENTS
        .iter()
        .any(|&slot| decisions[slot] == Decision::Withdraw)
}

/// Simultaneous mode.
///
/// Both patients keeping is the cooperative outcome: each patient earns
/// `success` and the automaton (never paid `success`) earns `withdraw`.
/// Otherwise the supplied priority permutation resolves simultaneity: the
/// first two withdrawers encountered earn `withdraw`, any further
/// withdrawer earns `failure`, and keepers outside the cooperative case
/// earn `failure`.
pub fn resolve_simultaneous(
    decisions: &BySlot<Decision>,
    payoffs: &Payoffs,
    priority: &[SlotId; 3],
) -> RoundOutcome {
    if decisions.patient_one == Decision::Keep && decisions.patient_two == Decision::Keep {
        return RoundOutcome {
            payoffs: BySlot::new(payoffs.success, payoffs.success, payoffs.withdraw),
            paid_when: None,
            seq_trace: None,
        };
    }

    let mut paid = BySlot::splat(payoffs.failure);
    let mut paid_count = 0u8;

    for &slot in priority {
        if decisions[slot] == Decision::Withdraw {
            if paid_count < 2 {
                paid[slot] = payoffs.withdraw;
                paid_count += 1;
            } else {
                paid[slot] = payoffs.failure;
            }
        }
    }

    RoundOutcome {
        payoffs: paid,
        paid_when: None,
        seq_trace: None,
    }
}

/// Sequential mode.
///
/// Walks the decision order once: withdrawers are paid immediately (first
/// two earn `withdraw`, later ones `failure`), keepers are deferred. The
/// deferred pass then settles cooperation: both patients keeping upgrades
/// them to `success`, otherwise every still-deferred slot earns `failure`.
pub fn resolve_sequential(
    decisions: &BySlot<Decision>,
    order: &[SlotId; 3],
    payoffs: &Payoffs,
) -> RoundOutcome {
    let mut paid = BySlot::splat(payoffs.failure);
    let mut paid_when = BySlot::splat(PaidWhen::Deferred);
    let mut trace: Vec<String> = Vec::with_capacity(3);
    let mut withdraw_count = 0u8;

    for &slot in order {
        match decisions[slot] {
            Decision::Withdraw => {
                withdraw_count += 1;
                let amount = if withdraw_count <= 2 {
                    payoffs.withdraw
                } else {
                    payoffs.failure
                };
                paid[slot] = amount;
                paid_when[slot] = PaidWhen::Immediate;
                trace.push(format!("{slot}:WITHDRAW=>{amount} (immediate)"));
            }
            Decision::Keep => {
                trace.push(format!("{slot}:KEEP (deferred)"));
            }
        }
    }

    if decisions.patient_one == Decision::Keep && decisions.patient_two == Decision::Keep {
        paid.patient_one = payoffs.success;
        paid.patient_two = payoffs.success;
    } else {
        for slot in SlotId::PATIENTS {
            if paid_when[slot] == PaidWhen::Deferred {
                paid[slot] = payoffs.failure;
            }
        }
    }

    RoundOutcome {
        payoffs: paid,
        paid_when: Some(paid_when),
        seq_trace: Some(trace.join(TRACE_SEPARATOR)),
    }
}
