//! Game flow orchestration.
//!
//! Binds the session state machine to timers, the decision agent, the
//! realtime hub, and the result sink. Every mutation of a session
//! (human submissions, agent completions, timer expiries) funnels
//! through the session's own lock, and every async continuation carries
//! the round number it targets so stale results are discarded instead
//! of applied.

mod orchestration;
mod player_actions;
mod timers;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ExperimentConfig;
use crate::llm::DecisionAgent;
use crate::services::matchmaking::Matchmaker;
use crate::services::storage::ResultSink;
use crate::session::SessionRegistry;
use crate::ws::hub::SessionHub;

/// Wall-clock pacing between phases.
#[derive(Debug, Clone)]
pub struct FlowPacing {
    /// Delay between game start and the first round.
    pub start_delay: Duration,
    /// Delay between round results and the next round, so participants
    /// can read the results.
    pub inter_round_delay: Duration,
    /// Delay between game over and the session being purged from memory.
    pub purge_delay: Duration,
}

impl Default for FlowPacing {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(2),
            inter_round_delay: Duration::from_secs(5),
            purge_delay: Duration::from_secs(60),
        }
    }
}

impl FlowPacing {
    /// No artificial delays; test runs drive phases back to back.
    pub fn immediate() -> Self {
        Self {
            start_delay: Duration::ZERO,
            inter_round_delay: Duration::ZERO,
            purge_delay: Duration::ZERO,
        }
    }
}

pub struct GameFlowService {
    registry: Arc<SessionRegistry>,
    matchmaker: Arc<Matchmaker>,
    hub: Arc<SessionHub>,
    agent: Arc<DecisionAgent>,
    sink: Arc<dyn ResultSink>,
    defaults: ExperimentConfig,
    pacing: FlowPacing,
}

impl GameFlowService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        matchmaker: Arc<Matchmaker>,
        hub: Arc<SessionHub>,
        agent: Arc<DecisionAgent>,
        sink: Arc<dyn ResultSink>,
        defaults: ExperimentConfig,
        pacing: FlowPacing,
    ) -> Self {
        Self {
            registry,
            matchmaker,
            hub,
            agent,
            sink,
            defaults,
            pacing,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn defaults(&self) -> &ExperimentConfig {
        &self.defaults
    }
}
