use crate::auth;
use crate::state::AppState;
use crate::websocket::handlers;
use crate::websocket::message_types::ClientEvent;
use crate::websocket::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::error;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<Uuid>,
    pub token: Option<String>,
}

// Payload pumped from the presence registry into this socket.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundText(String);

// WebSocket session actor: one per connection.
struct WsSession {
    connection_id: ConnectionId,
    user_id: Uuid,
    state: AppState,
    hb: Instant,
    // Registry receiver, taken when the actor starts.
    rx: Option<UnboundedReceiver<String>>,
}

impl WsSession {
    fn new(
        connection_id: ConnectionId,
        user_id: Uuid,
        state: AppState,
        rx: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            state,
            hb: Instant::now(),
            rx: Some(rx),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(connection = %act.connection_id, "heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection = %self.connection_id,
            user = %self.user_id,
            "websocket session started"
        );

        self.hb(ctx);

        // Pump registry broadcasts into this socket. The channel was
        // registered before ws::start so no event can race past it.
        if let Some(mut rx) = self.rx.take() {
            let addr = ctx.address();
            tokio::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    addr.do_send(OutboundText(payload));
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            connection = %self.connection_id,
            user = %self.user_id,
            "websocket session stopped"
        );

        let state = self.state.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            handlers::handle_disconnect(&state, connection_id).await;
        });
    }
}

impl Handler<OutboundText> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    let state = self.state.clone();
                    let origin = self.connection_id;
                    actix::spawn(async move {
                        handlers::dispatch(&state, origin, event).await;
                    });
                }
                Err(e) => {
                    // Unknown or malformed events are ignored, not errored.
                    tracing::warn!(
                        connection = %self.connection_id,
                        error = %e,
                        "ignoring unrecognized websocket event"
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary websocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection = %self.connection_id, ?reason, "websocket close received");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Handshake authentication. The user id is mandatory; the bearer token is
/// optional but must verify (and match the asserted user) when the service
/// has a secret configured. Runs before any registration or room join.
fn validate_ws_token(
    config: &crate::config::Config,
    params: &WsParams,
    req: &HttpRequest,
) -> Result<Uuid, actix_web::http::StatusCode> {
    let user_id = params.user_id.ok_or_else(|| {
        error!("websocket connection rejected: no user id in handshake");
        actix_web::http::StatusCode::UNAUTHORIZED
    })?;

    let token = params.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    if let (Some(secret), Some(token)) = (&config.auth_token_secret, token) {
        let claims = auth::verify_token(secret, &token).map_err(|_| {
            error!(user = %user_id, "websocket connection rejected: invalid token");
            actix_web::http::StatusCode::UNAUTHORIZED
        })?;
        if claims.sub != user_id {
            error!(user = %user_id, "websocket connection rejected: token subject mismatch");
            return Err(actix_web::http::StatusCode::UNAUTHORIZED);
        }
    }

    Ok(user_id)
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();

    // Authentication must pass before the connection touches any state.
    let user_id = match validate_ws_token(&state.config, &params, &req) {
        Ok(user_id) => user_id,
        Err(status) => return Ok(HttpResponse::build(status).finish()),
    };

    // Register the transport channel up front so the session can pump
    // broadcasts from its first moment. Presence starts later, at the
    // application-level user_login event.
    let connection_id = ConnectionId::new();
    let rx = state.delivery.presence().connect(connection_id).await;

    let session = WsSession::new(connection_id, user_id, state.as_ref().clone(), rx);
    ws::start(session, &req, stream)
}
