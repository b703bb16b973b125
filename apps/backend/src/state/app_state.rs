//! Shared application state.

use std::sync::Arc;

use crate::services::game_flow::GameFlowService;
use crate::session::SessionRegistry;
use crate::ws::hub::SessionHub;

/// Everything the HTTP and WebSocket layers need, behind one handle.
#[derive(Clone)]
pub struct AppState {
    flow: Arc<GameFlowService>,
}

impl AppState {
    pub fn new(flow: Arc<GameFlowService>) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &Arc<GameFlowService> {
        &self.flow
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        self.flow.hub()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.flow.registry()
    }
}
