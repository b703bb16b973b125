//! Countdown and delay tasks.
//!
//! Timers never mutate session state directly: on expiry they re-enter
//! the flow service through the same locked entry points as human
//! submissions, tagged with the round they were armed for.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::GameFlowService;
use crate::domain::TimerPhase;
use crate::ws::hub::Topic;
use crate::ws::protocol::ServerMsg;

const TICK: Duration = Duration::from_secs(1);

/// Start a phase countdown: broadcasts remaining time every second and
/// fires the phase's timeout handler at zero. The returned token stops
/// the task without firing.
pub(super) fn spawn_countdown(
    flow: Arc<GameFlowService>,
    session_id: Uuid,
    round_number: u32,
    phase: TimerPhase,
    duration: Duration,
) -> CancellationToken {
    let token = CancellationToken::new();
    let task_token = token.clone();

    tokio::spawn(async move {
        let duration_ms = duration.as_millis() as u64;
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            flow.hub().broadcast(
                &Topic::Session(session_id),
                ServerMsg::TimerUpdate {
                    phase,
                    duration_ms,
                    remaining_ms: remaining.as_millis() as u64,
                },
            );
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(remaining.min(TICK)) => {}
            }
        }

        let fired = match phase {
            TimerPhase::Decision => flow.handle_decision_timeout(session_id, round_number).await,
            TimerPhase::Chat => flow.handle_chat_timeout(session_id, round_number).await,
        };
        if let Err(err) = fired {
            debug!(
                session_id = %session_id,
                round = round_number,
                phase = ?phase,
                error = %err,
                "timer fired for a session that is gone"
            );
        }
    });

    token
}

pub(super) fn spawn_first_round(flow: Arc<GameFlowService>, session_id: Uuid, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = flow.start_round(session_id).await {
            warn!(session_id = %session_id, error = %err, "failed to start first round");
        }
    });
}

pub(super) fn spawn_round_advance(
    flow: Arc<GameFlowService>,
    session_id: Uuid,
    after_round: u32,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = flow.advance_or_end(session_id, after_round).await {
            debug!(
                session_id = %session_id,
                after_round,
                error = %err,
                "round advance target session is gone"
            );
        }
    });
}

pub(super) fn spawn_purge(flow: Arc<GameFlowService>, session_id: Uuid, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        flow.delete_session(session_id).await;
    });
}
