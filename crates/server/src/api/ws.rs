//! WebSocket notification gateway for live job progress.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use scriptrelay_core::{
    session_topic, EventBus, EventReceiver, EventSender, JobEvent, StepStatus, GLOBAL_TOPIC,
    JOB_EVENTS_TOPIC,
};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT};
use crate::state::AppState;

const SUBSCRIBED_MESSAGE: &str = "Subscription successful";

/// Frame sent to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Acknowledges a `subscribe` action.
    Subscribed {
        session_id: Option<String>,
        message: String,
    },
    /// A step changed status.
    LuaExecutionProgress {
        session_id: String,
        step_index: usize,
        step_title: String,
        status: StepStatus,
        log: Option<String>,
        timestamp: f64,
    },
    /// The job finished successfully.
    LuaExecutionCompleted {
        session_id: String,
        success: bool,
        result: Value,
        error: Option<String>,
        timestamp: f64,
    },
    /// The job failed.
    LuaExecutionError {
        session_id: String,
        error: String,
        details: Option<String>,
        timestamp: f64,
    },
    /// The client sent something the gateway could not act on.
    Error { message: String },
}

impl WsMessage {
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
        }
    }

    /// Value of the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::Subscribed { .. } => "subscribed",
            WsMessage::LuaExecutionProgress { .. } => "lua_execution_progress",
            WsMessage::LuaExecutionCompleted { .. } => "lua_execution_completed",
            WsMessage::LuaExecutionError { .. } => "lua_execution_error",
            WsMessage::Error { .. } => "error",
        }
    }
}

impl From<JobEvent> for WsMessage {
    fn from(event: JobEvent) -> Self {
        match event {
            JobEvent::Progress {
                session_id,
                step_index,
                step_title,
                status,
                log,
                timestamp,
            } => WsMessage::LuaExecutionProgress {
                session_id,
                step_index,
                step_title,
                status,
                log,
                timestamp,
            },
            JobEvent::Completed {
                session_id,
                success,
                result,
                error,
                timestamp,
            } => WsMessage::LuaExecutionCompleted {
                session_id,
                success,
                result,
                error,
                timestamp,
            },
            JobEvent::Error {
                session_id,
                error,
                details,
                timestamp,
            } => WsMessage::LuaExecutionError {
                session_id,
                error,
                details,
                timestamp,
            },
        }
    }
}

/// Client-to-server frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// One registered WebSocket connection.
#[derive(Debug, Clone)]
pub struct GatewayConnection {
    pub id: String,
    events: EventSender,
    replies: mpsc::UnboundedSender<WsMessage>,
}

impl GatewayConnection {
    fn reply(&self, message: WsMessage) {
        if self.replies.send(message).is_err() {
            debug!(connection_id = %self.id, "Reply dropped, connection closing");
        }
    }
}

/// Receiving halves for one connection: bus events and direct replies.
pub struct ConnectionStreams {
    pub events: EventReceiver,
    pub replies: mpsc::UnboundedReceiver<WsMessage>,
}

/// Maps WebSocket connections onto event bus topics.
#[derive(Debug, Clone)]
pub struct NotificationGateway {
    bus: EventBus,
}

impl NotificationGateway {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a new connection and join it to the global topic.
    pub fn connect(&self) -> (GatewayConnection, ConnectionStreams) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let connection = GatewayConnection {
            id: uuid::Uuid::new_v4().to_string(),
            events: events_tx,
            replies: replies_tx,
        };

        self.bus
            .group_add(GLOBAL_TOPIC, &connection.id, connection.events.clone());
        info!(connection_id = %connection.id, "WebSocket connection established");

        (
            connection,
            ConnectionStreams {
                events: events_rx,
                replies: replies_rx,
            },
        )
    }

    /// Join the job-events topic and, when given, the session's topic.
    ///
    /// The `subscribed` frame is queued before the topics are joined so it
    /// reaches the client ahead of any event for the session.
    pub fn subscribe(&self, connection: &GatewayConnection, session_id: Option<&str>) {
        let session_id = session_id.filter(|s| !s.is_empty());
        connection.reply(WsMessage::Subscribed {
            session_id: session_id.map(str::to_string),
            message: SUBSCRIBED_MESSAGE.to_string(),
        });

        self.bus
            .group_add(JOB_EVENTS_TOPIC, &connection.id, connection.events.clone());
        if let Some(session_id) = session_id {
            self.bus.group_add(
                &session_topic(session_id),
                &connection.id,
                connection.events.clone(),
            );
            debug!(connection_id = %connection.id, session_id, "Subscribed to session");
        }
    }

    /// Handle one text frame from the client. Every frame gets a reply.
    pub fn handle_text(&self, connection: &GatewayConnection, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                connection.reply(WsMessage::error(format!("Validation error: {}", e)));
                return;
            }
        };

        match frame.action.as_str() {
            "subscribe" => self.subscribe(connection, frame.session_id.as_deref()),
            other => {
                warn!(connection_id = %connection.id, action = other, "Unknown action received");
                connection.reply(WsMessage::error(format!("Unknown action: {}", other)));
            }
        }
    }

    /// Remove the connection from every topic. Safe to call twice.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        let left = self.bus.discard_all(connection_id);
        info!(connection_id, topics = left, "WebSocket connection closed");
        left
    }

    /// Topics the connection currently belongs to.
    pub fn topics_of(&self, connection_id: &str) -> Vec<String> {
        self.bus.topics_of(connection_id)
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let gateway = state.gateway().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, gateway: NotificationGateway) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut streams) = gateway.connect();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    let connection_id = connection.id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                Some(reply) = streams.replies.recv() => reply,
                Some(event) = streams.events.recv() => WsMessage::from(event),
                else => break,
            };
            WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();

            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!(connection_id = %connection_id, "WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize WsMessage: {}", e);
                }
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => gateway.handle_text(&connection, text.as_str()),
            Ok(Message::Binary(_)) => {
                connection.reply(WsMessage::error("Validation error: expected a text frame"))
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection.id, "WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %connection.id, "WebSocket receive error: {}", e);
                break;
            }
        }
    }

    gateway.disconnect(&connection.id);
    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> NotificationGateway {
        NotificationGateway::new(EventBus::new())
    }

    #[test]
    fn test_connect_joins_global_topic() {
        let gateway = gateway();
        let (conn, _streams) = gateway.connect();

        assert_eq!(gateway.topics_of(&conn.id), vec![GLOBAL_TOPIC.to_string()]);
        assert_eq!(gateway.bus().group_size(GLOBAL_TOPIC), 1);
    }

    #[test]
    fn test_subscribe_with_session() {
        let gateway = gateway();
        let (conn, mut streams) = gateway.connect();

        gateway.handle_text(&conn, r#"{"action":"subscribe","session_id":"abc"}"#);

        assert_eq!(
            streams.replies.try_recv().unwrap(),
            WsMessage::Subscribed {
                session_id: Some("abc".to_string()),
                message: SUBSCRIBED_MESSAGE.to_string(),
            }
        );
        let topics = gateway.topics_of(&conn.id);
        assert!(topics.contains(&JOB_EVENTS_TOPIC.to_string()));
        assert!(topics.contains(&"session:abc".to_string()));
    }

    #[test]
    fn test_subscribe_without_session() {
        let gateway = gateway();
        let (conn, mut streams) = gateway.connect();

        gateway.handle_text(&conn, r#"{"action":"subscribe"}"#);

        assert!(matches!(
            streams.replies.try_recv().unwrap(),
            WsMessage::Subscribed { session_id: None, .. }
        ));
        assert_eq!(gateway.topics_of(&conn.id).len(), 2);
    }

    #[test]
    fn test_unknown_action_gets_error() {
        let gateway = gateway();
        let (conn, mut streams) = gateway.connect();

        gateway.handle_text(&conn, r#"{"action":"dance"}"#);

        assert_eq!(
            streams.replies.try_recv().unwrap(),
            WsMessage::error("Unknown action: dance")
        );
    }

    #[test]
    fn test_malformed_frame_gets_validation_error() {
        let gateway = gateway();
        let (conn, mut streams) = gateway.connect();

        gateway.handle_text(&conn, "not json");
        gateway.handle_text(&conn, r#"{"session_id":"abc"}"#);

        for _ in 0..2 {
            match streams.replies.try_recv().unwrap() {
                WsMessage::Error { message } => assert!(message.starts_with("Validation error: ")),
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let gateway = gateway();
        let (conn, _streams) = gateway.connect();
        gateway.subscribe(&conn, Some("abc"));

        assert_eq!(gateway.disconnect(&conn.id), 3);
        assert_eq!(gateway.disconnect(&conn.id), 0);
        assert!(gateway.topics_of(&conn.id).is_empty());
    }

    #[test]
    fn test_session_event_delivered_once() {
        let gateway = gateway();
        let (conn, mut streams) = gateway.connect();
        gateway.subscribe(&conn, Some("abc"));

        let event = JobEvent::error("abc", "boom", None);
        let topic = session_topic("abc");
        gateway
            .bus()
            .multicast(&[topic.as_str(), JOB_EVENTS_TOPIC], event.clone());

        assert_eq!(streams.events.try_recv().unwrap(), event);
        assert!(streams.events.try_recv().is_err());
    }

    #[test]
    fn test_progress_frame_shape() {
        let event = JobEvent::progress("abc", 2, "Step 2", StepStatus::Pending, None);
        let value = serde_json::to_value(WsMessage::from(event)).unwrap();

        assert_eq!(value["type"], "lua_execution_progress");
        assert_eq!(value["session_id"], "abc");
        assert_eq!(value["step_index"], 2);
        assert_eq!(value["step_title"], "Step 2");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["log"], Value::Null);
        assert!(value["timestamp"].is_f64());
    }

    #[test]
    fn test_completed_frame_shape() {
        let event = JobEvent::completed("abc", json!({"script_executed": true}));
        let value = serde_json::to_value(WsMessage::from(event)).unwrap();

        assert_eq!(value["type"], "lua_execution_completed");
        assert_eq!(value["success"], true);
        assert_eq!(value["result"]["script_executed"], true);
        assert_eq!(value["error"], Value::Null);
    }

    #[test]
    fn test_error_frame_shape() {
        let event = JobEvent::error("abc", "Splash error: HTTP 500", Some("oops".to_string()));
        let value = serde_json::to_value(WsMessage::from(event)).unwrap();

        assert_eq!(value["type"], "lua_execution_error");
        assert_eq!(value["error"], "Splash error: HTTP 500");
        assert_eq!(value["details"], "oops");
    }
}
