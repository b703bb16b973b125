//! Per-connection WebSocket actor.
//!
//! Parses inbound JSON into [`ClientMsg`], dispatches into the flow
//! service, and relays hub events back out. The actor itself holds no
//! game state; the connection id is the only identity it carries.

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::game_flow::GameFlowService;
use crate::state::AppState;
use crate::ws::hub::Outbound;
use crate::ws::protocol::{ClientMsg, ServerMsg};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(40);

pub async fn upgrade(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let conn_id = Uuid::new_v4();
    let session = WsConnection::new(conn_id, app_state);
    ws::start(session, &req, stream)
}

pub struct WsConnection {
    conn_id: Uuid,
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl WsConnection {
    fn new(conn_id: Uuid, app_state: web::Data<AppState>) -> Self {
        Self {
            conn_id,
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    fn flow(&self) -> std::sync::Arc<GameFlowService> {
        self.app_state.flow().clone()
    }

    fn send_json(ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMsg) {
        match serde_json::to_string(msg) {
            Ok(payload) => ctx.text(payload),
            Err(err) => warn!(error = %err, "failed to serialize outbound message"),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |actor, ctx| {
            if Instant::now().duration_since(actor.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(conn_id = %actor.conn_id, "heartbeat timed out");
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
                ctx.stop();
                return;
            }
            ctx.ping(b"keepalive");
        });
    }

    /// Run a flow call off the actor thread and report any rejection to
    /// this connection only.
    fn spawn_flow<F>(&self, ctx: &mut ws::WebsocketContext<Self>, fut: F)
    where
        F: std::future::Future<Output = Result<(), crate::errors::GameError>> + 'static,
    {
        ctx.spawn(fut.into_actor(self).map(|res, _actor, ctx| {
            if let Err(err) = res {
                Self::send_json(ctx, &ServerMsg::error(&err));
            }
        }));
    }

    fn dispatch(&self, cmd: ClientMsg, ctx: &mut ws::WebsocketContext<Self>) {
        let flow = self.flow();
        let conn_id = self.conn_id;

        match cmd {
            ClientMsg::CreateRoom { mode } => {
                flow.create_room(conn_id, mode);
            }
            ClientMsg::JoinRoom {
                room_code,
                player_name,
            } => {
                if let Err(err) = flow.join_room(conn_id, &room_code, &player_name) {
                    Self::send_json(ctx, &ServerMsg::error(&err));
                }
            }
            ClientMsg::LeaveRoom { .. } => {
                flow.leave_room(conn_id);
            }
            ClientMsg::StartGame { room_code, config } => {
                self.spawn_flow(ctx, async move {
                    flow.start_game(conn_id, &room_code, config).await.map(drop)
                });
            }
            ClientMsg::SubmitDecision {
                session_id,
                decision,
            } => {
                self.spawn_flow(ctx, async move {
                    flow.submit_decision(conn_id, session_id, decision).await
                });
            }
            ClientMsg::SendChat {
                session_id,
                message,
            } => {
                self.spawn_flow(ctx, async move {
                    flow.submit_chat(conn_id, session_id, &message).await
                });
            }
            ClientMsg::Reconnect { session_id, token } => {
                self.spawn_flow(ctx, async move {
                    flow.reconnect(conn_id, session_id, token).await.map(drop)
                });
            }
        }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(conn_id = %self.conn_id, "connection opened");
        let recipient = ctx.address().recipient::<Outbound>();
        self.app_state.hub().register(self.conn_id, recipient);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(conn_id = %self.conn_id, "connection closed");
        self.app_state.hub().unregister(self.conn_id);

        let flow = self.flow();
        let conn_id = self.conn_id;
        tokio::spawn(async move {
            flow.handle_disconnect(conn_id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(cmd) => self.dispatch(cmd, ctx),
                    Err(err) => {
                        Self::send_json(
                            ctx,
                            &ServerMsg::Error {
                                code: "VALIDATION_ERROR".to_string(),
                                message: format!("malformed message: {err}"),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.last_heartbeat = Instant::now();
                Self::send_json(
                    ctx,
                    &ServerMsg::Error {
                        code: "VALIDATION_ERROR".to_string(),
                        message: "binary frames are not supported".to_string(),
                    },
                );
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {
                self.last_heartbeat = Instant::now();
            }
            Err(err) => {
                warn!(conn_id = %self.conn_id, error = %err, "websocket protocol error");
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Error)));
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) -> Self::Result {
        Self::send_json(ctx, &msg.0);
    }
}
